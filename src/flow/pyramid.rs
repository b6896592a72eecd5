//! Image pyramid for coarse-to-fine optical flow.

use crate::flow::frame::{GrayFrame, Plane};

/// Smallest usable level dimension; levels that would fall below this are
/// not built.
const MIN_LEVEL_DIM: usize = 16;

/// Pyramid of f32 planes, finest (full frame resolution) at index 0, each
/// following level half the size of the previous.
pub struct Pyramid {
    levels: Vec<Plane>,
}

impl Pyramid {
    /// Build up to `max_levels` levels. Each level averages 2x2 blocks of
    /// the previous one, which both decimates and suppresses aliasing.
    pub fn build(frame: &GrayFrame, max_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(max_levels.max(1));
        levels.push(frame.to_plane());

        for _ in 1..max_levels {
            let prev = levels.last().expect("pyramid has at least one level");
            if prev.width() / 2 < MIN_LEVEL_DIM || prev.height() / 2 < MIN_LEVEL_DIM {
                break;
            }
            levels.push(downsample_2x(prev));
        }

        Pyramid { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &Plane {
        &self.levels[level]
    }

    /// Dimensions of the finest level.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.levels[0].width(), self.levels[0].height())
    }
}

/// Halve both dimensions, each output pixel the mean of a 2x2 input block.
fn downsample_2x(src: &Plane) -> Plane {
    let new_w = src.width() / 2;
    let new_h = src.height() / 2;
    let mut data = Vec::with_capacity(new_w * new_h);

    for y in 0..new_h {
        for x in 0..new_w {
            let sum = src.get(2 * x, 2 * y)
                + src.get(2 * x + 1, 2 * y)
                + src.get(2 * x, 2 * y + 1)
                + src.get(2 * x + 1, 2 * y + 1);
            data.push(sum * 0.25);
        }
    }

    Plane::new(new_w, new_h, data)
}

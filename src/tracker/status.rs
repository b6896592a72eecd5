/// Lifecycle status of a track.
///
/// Transitions are monotonic: Candidate → Confirmed → Expired, and Expired
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackStatus {
    /// Tentative track awaiting enough detections to be trusted
    #[default]
    Candidate,
    /// Stable track counted as one piece of debris
    Confirmed,
    /// Stale track awaiting removal from the registry
    Expired,
}

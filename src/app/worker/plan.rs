//! Transfer decision for one entry
//!
//! Pure function of the entry and the observed state of its final path and
//! staging file. Nothing here touches the filesystem.

use crate::app::models::{DependencyEntry, LocalFileState, TransferAction};

/// Filesystem preparation that must happen before the action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingStep {
    /// Nothing to prepare
    None,
    /// Move the undersized final file to the staging path and resume it
    AdoptFinalAsPartial,
    /// Remove the staging file only
    DiscardPartial,
    /// Remove both the final file and the staging file
    DiscardAll,
}

/// Decided action plus its preparation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub action: TransferAction,
    pub staging: StagingStep,
}

impl TransferPlan {
    fn new(action: TransferAction, staging: StagingStep) -> Self {
        Self { action, staging }
    }
}

/// Decide how to bring an entry's artifact into a verified state
///
/// For the final path:
/// - exactly `expected_size` bytes: verify only
/// - larger: redownload from byte 0
/// - smaller, uncompressed and non-empty: move it to the staging path and resume
/// - smaller otherwise: redownload (decompressed bytes cannot be resumed)
///
/// With no final file, a staging file is resumed from its length unless it is
/// already longer than the known transfer size.
pub fn plan_transfer(
    entry: &DependencyEntry,
    final_state: &LocalFileState,
    partial_state: &LocalFileState,
) -> TransferPlan {
    if final_state.exists {
        let size = final_state.size;

        if size == entry.expected_size {
            let staging = if partial_state.exists {
                StagingStep::DiscardPartial
            } else {
                StagingStep::None
            };
            return TransferPlan::new(TransferAction::VerifyOnly, staging);
        }

        if size < entry.expected_size && !entry.compressed && size > 0 {
            return TransferPlan::new(
                TransferAction::Resume { offset: size },
                StagingStep::AdoptFinalAsPartial,
            );
        }

        return TransferPlan::new(TransferAction::Redownload, StagingStep::DiscardAll);
    }

    if partial_state.exists && partial_state.size > 0 {
        let size = partial_state.size;
        return match entry.transfer_size() {
            Some(limit) if size > limit => {
                TransferPlan::new(TransferAction::Redownload, StagingStep::DiscardPartial)
            }
            _ => TransferPlan::new(TransferAction::Resume { offset: size }, StagingStep::None),
        };
    }

    TransferPlan::new(TransferAction::New, StagingStep::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hash::Sha1Hash;
    use url::Url;

    fn entry() -> DependencyEntry {
        DependencyEntry::new(
            Url::parse("https://mirror.example.com/blob").unwrap(),
            "blob",
            1000,
            Sha1Hash::digest(b"blob"),
        )
    }

    fn present(size: u64) -> LocalFileState {
        LocalFileState {
            exists: true,
            size,
            modified_ns: 1,
        }
    }

    fn absent() -> LocalFileState {
        LocalFileState::absent()
    }

    #[test]
    fn test_nothing_on_disk_is_new() {
        let plan = plan_transfer(&entry(), &absent(), &absent());
        assert_eq!(plan.action, TransferAction::New);
        assert_eq!(plan.staging, StagingStep::None);
    }

    #[test]
    fn test_exact_size_verifies_only() {
        let plan = plan_transfer(&entry(), &present(1000), &absent());
        assert_eq!(plan.action, TransferAction::VerifyOnly);

        let with_leftover = plan_transfer(&entry(), &present(1000), &present(10));
        assert_eq!(with_leftover.action, TransferAction::VerifyOnly);
        assert_eq!(with_leftover.staging, StagingStep::DiscardPartial);
    }

    #[test]
    fn test_oversized_final_redownloads() {
        let plan = plan_transfer(&entry(), &present(1200), &absent());
        assert_eq!(plan.action, TransferAction::Redownload);
        assert_eq!(plan.staging, StagingStep::DiscardAll);
    }

    #[test]
    fn test_undersized_final_is_adopted_and_resumed() {
        let plan = plan_transfer(&entry(), &present(400), &absent());
        assert_eq!(plan.action, TransferAction::Resume { offset: 400 });
        assert_eq!(plan.staging, StagingStep::AdoptFinalAsPartial);
    }

    #[test]
    fn test_undersized_compressed_final_redownloads() {
        let compressed = entry().with_compression(Some(300));
        let plan = plan_transfer(&compressed, &present(400), &absent());
        assert_eq!(plan.action, TransferAction::Redownload);
    }

    #[test]
    fn test_partial_resumes_from_its_length() {
        let plan = plan_transfer(&entry(), &absent(), &present(400));
        assert_eq!(plan.action, TransferAction::Resume { offset: 400 });
        assert_eq!(plan.staging, StagingStep::None);

        let complete = plan_transfer(&entry(), &absent(), &present(1000));
        assert_eq!(complete.action, TransferAction::Resume { offset: 1000 });
    }

    #[test]
    fn test_oversized_partial_redownloads() {
        let plan = plan_transfer(&entry(), &absent(), &present(1001));
        assert_eq!(plan.action, TransferAction::Redownload);
        assert_eq!(plan.staging, StagingStep::DiscardPartial);
    }

    #[test]
    fn test_compressed_partial_bounds() {
        let known = entry().with_compression(Some(300));
        assert_eq!(
            plan_transfer(&known, &absent(), &present(301)).action,
            TransferAction::Redownload
        );
        assert_eq!(
            plan_transfer(&known, &absent(), &present(200)).action,
            TransferAction::Resume { offset: 200 }
        );

        // Unknown compressed size: always resume
        let unknown = entry().with_compression(None);
        assert_eq!(
            plan_transfer(&unknown, &absent(), &present(5000)).action,
            TransferAction::Resume { offset: 5000 }
        );
    }

    #[test]
    fn test_empty_partial_is_new() {
        let plan = plan_transfer(&entry(), &absent(), &present(0));
        assert_eq!(plan.action, TransferAction::New);
    }
}

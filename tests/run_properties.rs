//! Property tests for run accounting over arbitrary failure patterns and caps.

mod common;

use proptest::prelude::*;

use common::{RecordingAnonymizer, scratch_config, write_input};
use dicom_intake::service::coordinator::IntakeService;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Counters always balance, and only failures are left for the next run.
    #[test]
    fn run_accounting_holds(
        failing in prop::collection::vec(any::<bool>(), 0..12),
        cap in prop::option::of(1usize..15),
        force in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scratch_config(dir.path());
        config.limits.max_concurrent_files = cap;

        let anon = RecordingAnonymizer::new(&config);
        for (i, fails) in failing.iter().enumerate() {
            let name = format!("f{i:02}.dcm");
            write_input(&config, &name);
            if *fails {
                anon.fail(&name);
            }
        }
        let service = IntakeService::new(config, anon.clone()).unwrap();

        let first = service.run(force).unwrap();
        let expected_seen = cap.map_or(failing.len(), |c| c.min(failing.len()));
        prop_assert_eq!(first.files_seen, expected_seen);
        prop_assert!(first.enqueued <= first.files_seen);
        prop_assert_eq!(first.completed + first.errors, first.enqueued);
        // Fresh store: everything seen is new.
        prop_assert_eq!(first.enqueued, first.files_seen);

        let second = service.run(false).unwrap();
        prop_assert_eq!(second.files_seen, first.files_seen);
        prop_assert_eq!(second.enqueued, first.errors);
        prop_assert_eq!(second.completed, 0);
        prop_assert_eq!(second.completed + second.errors, second.enqueued);
        prop_assert_eq!(service.processed_count(), first.completed);
    }
}

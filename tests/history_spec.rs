use arbor::history::{HistoryLog, DEFAULT_HISTORY_DEPTH};
use arbor::models::*;
use arbor::store::Tree;
use arbor::Error;
use speculate2::speculate;

fn with_child(tree: &Tree, name: &str) -> Tree {
    let mut next = tree.clone();
    let root = next.root_id();
    next.add_child(&root, name).expect("root exists");
    next
}

speculate! {
    before {
        let mut log = HistoryLog::default();
        let empty = Tree::new("Home");
    }

    describe "a fresh log" {
        it "has nothing to undo or redo" {
            assert!(!log.can_undo());
            assert!(!log.can_redo());
            assert!(matches!(log.undo(&empty), Err(Error::NothingToUndo)));
            assert!(matches!(log.redo(&empty), Err(Error::NothingToRedo)));
            assert_eq!(log.status(), HistoryStatus { undo: 0, redo: 0 });
        }
    }

    describe "undo" {
        it "returns the snapshot recorded before the change" {
            log.record_snapshot(&empty);
            let changed = with_child(&empty, "A");

            let restored = log.undo(&changed).unwrap();

            assert_eq!(restored, empty);
            assert_eq!(log.status(), HistoryStatus { undo: 0, redo: 1 });
        }

        it "walks back through several changes in order" {
            let one = with_child(&empty, "A");
            let two = with_child(&one, "B");
            log.record_snapshot(&empty);
            log.record_snapshot(&one);

            assert_eq!(log.undo(&two).unwrap(), one);
            assert_eq!(log.undo(&one).unwrap(), empty);
            assert!(matches!(log.undo(&empty), Err(Error::NothingToUndo)));
        }
    }

    describe "redo" {
        it "returns the tree that was current at undo time" {
            let changed = with_child(&empty, "A");
            log.record_snapshot(&empty);

            let undone = log.undo(&changed).unwrap();
            let redone = log.redo(&undone).unwrap();

            assert_eq!(redone, changed);
            assert_eq!(log.status(), HistoryStatus { undo: 1, redo: 0 });
        }

        it "is cleared by recording a new snapshot" {
            let changed = with_child(&empty, "A");
            log.record_snapshot(&empty);
            log.undo(&changed).unwrap();
            assert!(log.can_redo());

            log.record_snapshot(&empty);

            assert!(!log.can_redo());
            assert!(matches!(log.redo(&empty), Err(Error::NothingToRedo)));
        }
    }

    describe "bounds" {
        it "keeps only the most recent snapshots" {
            let mut current = empty.clone();
            let mut states = Vec::new();
            for i in 0..DEFAULT_HISTORY_DEPTH + 5 {
                log.record_snapshot(&current);
                states.push(current.clone());
                current = with_child(&current, &format!("n{}", i));
            }

            assert_eq!(log.status().undo, DEFAULT_HISTORY_DEPTH);

            let mut undone = 0;
            while let Ok(previous) = log.undo(&current) {
                current = previous;
                undone += 1;
            }
            assert_eq!(undone, DEFAULT_HISTORY_DEPTH);
            // The oldest five snapshots were evicted.
            assert_eq!(current, states[5]);
        }

        it "honours a custom depth" {
            let mut small = HistoryLog::new(3);
            for _ in 0..10 {
                small.record_snapshot(&empty);
            }
            assert_eq!(small.status().undo, 3);
        }
    }

    describe "clear" {
        it "drops both stacks" {
            log.record_snapshot(&empty);
            log.record_snapshot(&empty);
            log.undo(&empty).unwrap();

            log.clear();

            assert_eq!(log.status(), HistoryStatus { undo: 0, redo: 0 });
        }
    }

    describe "snapshots" {
        it "are unaffected by later edits to the recorded tree" {
            let mut tree = empty.clone();
            log.record_snapshot(&tree);
            let root = tree.root_id();
            tree.add_child(&root, "A").unwrap();

            assert_eq!(log.latest().unwrap().tree(), &empty);
        }
    }
}

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor::models::*;
use arbor::persist::{
    ArtifactStorage, GateState, MemoryStorage, PersistenceError, RestoreGate, TreeRepository,
};
use arbor::service::{TreeService, DEFAULT_SESSION};
use arbor::Error;
use serde_json::json;
use speculate2::speculate;

/// Storage whose writes can be made to fail.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ArtifactStorage for FlakyStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.inner.read()
    }

    fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                path: PathBuf::from("flaky"),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.write(bytes)
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

fn child_names(service: &TreeService, parent: &NodeId) -> Vec<String> {
    service
        .list_children(parent)
        .expect("parent exists")
        .into_iter()
        .map(|view| view.node.name)
        .collect()
}

const S: &str = DEFAULT_SESSION;

speculate! {
    before {
        let storage = Arc::new(FlakyStorage::default());
        let service = TreeService::new(TreeRepository::new(storage.clone(), "Home"), 20);
        let root = NodeId::root();
    }

    describe "reads" {
        it "show a root-only tree before anything is stored, without writing it" {
            let tree = service.tree().unwrap();

            assert_eq!(tree.len(), 1);
            assert_eq!(service.get_node(&root).unwrap().node.name, "Home");
            assert!(storage.read().unwrap().is_none());
        }

        it "store the root with the first mutation" {
            service.create_node(S, &root, "A").unwrap();

            let reopened = TreeService::new(TreeRepository::new(storage.clone(), "Home"), 20);
            assert_eq!(reopened.tree().unwrap().len(), 2);
        }

        it "reports missing nodes" {
            assert!(matches!(
                service.get_node(&NodeId::new("ghost")),
                Err(Error::NotFound(_))
            ));
        }
    }

    describe "mutations" {
        it "persist every change" {
            let a = service.create_node(S, &root, "A").unwrap();
            service.rename_node(S, &a.id, "Renamed").unwrap();

            let reopened = TreeService::new(TreeRepository::new(storage.clone(), "Home"), 20);
            assert_eq!(child_names(&reopened, &root), vec!["Renamed"]);
        }

        it "record one history entry each" {
            let a = service.create_node(S, &root, "A").unwrap();
            service.append_contents(S, &a.id, vec![json!({"type": "text"}).into()]).unwrap();
            service.clear_contents(S, &a.id).unwrap();

            assert_eq!(service.history_status(S), HistoryStatus { undo: 3, redo: 0 });
        }

        it "leave tree and history untouched when they fail" {
            service.create_node(S, &root, "A").unwrap();
            let before = service.tree().unwrap();

            let result = service.delete_subtree(S, &root);

            assert!(matches!(result, Err(Error::InvalidOperation(_))));
            assert_eq!(service.tree().unwrap(), before);
            assert_eq!(service.history_status(S), HistoryStatus { undo: 1, redo: 0 });
        }

        it "leave tree and history untouched when persisting fails" {
            service.create_node(S, &root, "A").unwrap();
            let before = service.tree().unwrap();

            storage.fail_writes(true);
            let result = service.create_node(S, &root, "B");
            storage.fail_writes(false);

            assert!(matches!(result, Err(Error::Persistence(_))));
            assert_eq!(service.tree().unwrap(), before);
            assert_eq!(service.history_status(S), HistoryStatus { undo: 1, redo: 0 });
        }

        it "clone a subtree under a new parent" {
            let a = service.create_node(S, &root, "A").unwrap();
            service.create_node(S, &a.id, "B").unwrap();
            let target = service.create_node(S, &root, "Target").unwrap();

            let copy = service.clone_subtree(S, &a.id, &target.id).unwrap();

            assert_eq!(copy.node.name, "A");
            assert_eq!(copy.node.parent, Some(target.id.clone()));
            assert_eq!(child_names(&service, &copy.id), vec!["B"]);
        }

        it "reorder children" {
            let a = service.create_node(S, &root, "A").unwrap();
            let b = service.create_node(S, &root, "B").unwrap();

            let children = service.reorder_children(S, &root, &[b.id, a.id]).unwrap();

            let names: Vec<_> = children.into_iter().map(|v| v.node.name).collect();
            assert_eq!(names, vec!["B", "A"]);
        }
    }

    describe "undo and redo" {
        it "walk back and forth through a delete" {
            let a = service.create_node(S, &root, "A").unwrap();
            let b = service.create_node(S, &a.id, "B").unwrap();
            service.delete_subtree(S, &a.id).unwrap();
            assert_eq!(service.tree().unwrap().len(), 1);

            service.undo(S).unwrap();
            let tree = service.tree().unwrap();
            assert!(tree.contains(&a.id));
            assert!(tree.contains(&b.id));

            service.undo(S).unwrap();
            let tree = service.tree().unwrap();
            assert!(tree.contains(&a.id));
            assert!(!tree.contains(&b.id));

            service.redo(S).unwrap();
            let tree = service.tree().unwrap();
            assert!(tree.contains(&b.id));
            assert_eq!(tree.get(&b.id).unwrap().parent, Some(a.id.clone()));
        }

        it "fail cleanly with nothing recorded" {
            assert!(matches!(service.undo(S), Err(Error::NothingToUndo)));
            assert!(matches!(service.redo(S), Err(Error::NothingToRedo)));
        }

        it "lose the redo stack after a new mutation" {
            service.create_node(S, &root, "A").unwrap();
            service.undo(S).unwrap();
            assert_eq!(service.history_status(S).redo, 1);

            service.create_node(S, &root, "B").unwrap();

            assert!(matches!(service.redo(S), Err(Error::NothingToRedo)));
            assert_eq!(child_names(&service, &root), vec!["B"]);
        }

        it "keep at most twenty steps" {
            for i in 0..25 {
                service.create_node(S, &root, &format!("n{}", i)).unwrap();
            }

            let mut steps = 0;
            while service.undo(S).is_ok() {
                steps += 1;
            }

            assert_eq!(steps, 20);
            assert_eq!(service.tree().unwrap().len(), 6);
        }

        it "report the stacks left by the step" {
            service.create_node(S, &root, "A").unwrap();
            service.create_node(S, &root, "B").unwrap();

            let step = service.undo(S).unwrap();
            assert_eq!(step.nodes, 2);
            assert_eq!(step.history, HistoryStatus { undo: 1, redo: 1 });

            let step = service.redo(S).unwrap();
            assert_eq!(step.nodes, 3);
            assert_eq!(step.history, HistoryStatus { undo: 2, redo: 0 });
        }

        it "keep history separate per session" {
            service.create_node("alice", &root, "A").unwrap();

            assert!(matches!(service.undo("bob"), Err(Error::NothingToUndo)));
            assert_eq!(service.history_status("alice").undo, 1);
        }

        it "leave the stacks alone when persisting fails" {
            service.create_node(S, &root, "A").unwrap();

            storage.fail_writes(true);
            let result = service.undo(S);
            storage.fail_writes(false);

            assert!(matches!(result, Err(Error::Persistence(_))));
            assert_eq!(service.history_status(S), HistoryStatus { undo: 1, redo: 0 });
            assert_eq!(child_names(&service, &root), vec!["A"]);
        }
    }

    describe "backup" {
        it "round-trips through export and import" {
            let a = service.create_node(S, &root, "A").unwrap();
            service.set_contents(S, &a.id, vec![json!({"type": "photo", "file_id": "f"}).into()])
                .unwrap();
            let bundle = service.export_backup().unwrap();
            assert_eq!(bundle.format_version, BACKUP_FORMAT_VERSION);

            service.delete_subtree(S, &a.id).unwrap();
            let payload = serde_json::to_vec(&bundle).unwrap();
            let imported = service.import_backup(&payload).unwrap();

            assert_eq!(imported, bundle.store);
            assert_eq!(service.tree().unwrap(), bundle.store);
        }

        it "accepts a bare store record" {
            let payload = serde_json::to_vec(&json!({
                "root": { "name": "Home", "parent": null, "children": ["x"] },
                "x": { "name": "X", "parent": "root", "children": [] }
            })).unwrap();

            let tree = service.import_backup(&payload).unwrap();

            assert_eq!(tree.len(), 2);
            assert_eq!(child_names(&service, &root), vec!["X"]);
        }

        it "clears every session's history" {
            service.create_node("alice", &root, "A").unwrap();
            service.create_node("bob", &root, "B").unwrap();
            let payload = serde_json::to_vec(&service.export_backup().unwrap()).unwrap();

            service.import_backup(&payload).unwrap();

            assert_eq!(service.history_status("alice"), HistoryStatus { undo: 0, redo: 0 });
            assert!(matches!(service.undo("bob"), Err(Error::NothingToUndo)));
        }

        it "rejects payloads that are not a valid tree" {
            service.create_node(S, &root, "A").unwrap();
            let before = service.tree().unwrap();

            let garbage = service.import_backup(b"not json");
            let cyclic = service.import_backup(&serde_json::to_vec(&json!({
                "root": { "name": "Home", "parent": null, "children": ["x"] },
                "x": { "name": "X", "parent": "root", "children": ["x"] }
            })).unwrap());

            assert!(matches!(garbage, Err(Error::InvalidOperation(_))));
            assert!(matches!(cyclic, Err(Error::InvalidOperation(_))));
            assert_eq!(service.tree().unwrap(), before);
            assert_eq!(service.history_status(S).undo, 1);
        }
    }

    describe "restore gate" {
        before {
            let gate = RestoreGate::new();
            let service = TreeService::new(TreeRepository::new(storage.clone(), "Home"), 20)
                .with_gate(gate.clone());
        }

        it "refuses reads and writes of a missing tree while pending" {
            assert!(matches!(
                service.get_node(&root),
                Err(Error::Persistence(PersistenceError::AwaitingRestore))
            ));
            assert!(matches!(
                service.create_node(S, &root, "A"),
                Err(Error::Persistence(PersistenceError::AwaitingRestore))
            ));
            assert!(storage.read().unwrap().is_none());
        }

        it "refuses writes while pending even with local data" {
            let repo = service.repository();
            repo.save(&repo.fresh_tree()).unwrap();
            let before = storage.read().unwrap();

            assert_eq!(service.tree().unwrap().len(), 1);
            assert!(service.create_node(S, &root, "A").is_err());
            assert!(service.import_backup(&before.clone().unwrap()).is_err());
            assert_eq!(storage.read().unwrap(), before);
        }

        it "starts a new tree once the remote is known to be empty" {
            gate.set(GateState::Fresh);

            service.create_node(S, &root, "A").unwrap();

            assert_eq!(service.tree().unwrap().len(), 2);
        }

        it "does not recreate a tree that went missing after restore" {
            gate.set(GateState::Restored);

            assert!(service.create_node(S, &root, "A").is_err());
            assert!(storage.read().unwrap().is_none());
        }
    }
}

//! Naming Module Tests
//!
//! Validates the Name Server's state and command handling.
//!
//! ## Test Scopes
//! - **Types & Protocol**: Permission flags, access ordering and command parsing.
//! - **SessionRegistry**: Username uniqueness and drop-based cleanup.
//! - **FileCatalog**: Grants, ownership checks and listing policies.
//! - **NamingService**: End-to-end command handling against an in-process fake Storage Server.

#[cfg(test)]
mod tests {
    use crate::config::{NameServerConfig, ViewAllPolicy};
    use crate::error::DfsError;
    use crate::naming::catalog::FileCatalog;
    use crate::naming::dispatcher::NamingService;
    use crate::naming::protocol::{NmCommand, RegisterClient};
    use crate::naming::session::{SessionHandle, SessionRegistry};
    use crate::naming::types::{Access, FileRecord, Permission, StorageId};
    use crate::storage::protocol::{ControlCommand, FileStats};
    use crate::wire::{Response, read_line, write_frame};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tokio::net::{TcpListener, TcpStream};

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn service_with(policy: ViewAllPolicy) -> Arc<NamingService> {
        NamingService::new(NameServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            view_all_policy: policy,
            forward_timeout_ms: 2000,
            ..NameServerConfig::default()
        })
    }

    fn login(service: &NamingService, user: &str) -> SessionHandle {
        service.sessions.register(user, 0, 0, peer()).unwrap()
    }

    async fn run(service: &NamingService, user: &str, line: &str) -> Response {
        service.handle_line(user, line).await.response
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    /// Answers control commands like a healthy Storage Server, without storing content.
    async fn fake_storage(stream: TcpStream) {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut undone = HashSet::new();

        while let Ok(Some(line)) = read_line(&mut reader).await {
            let response = match ControlCommand::parse(&line) {
                Ok(ControlCommand::Create { file, .. }) => Response::ok(format!("File '{}' created", file)),
                Ok(ControlCommand::Delete { file }) => Response::ok(format!("File '{}' deleted", file)),
                Ok(ControlCommand::Info { .. }) => Response::ok(
                    FileStats {
                        size_bytes: 11,
                        words: 2,
                        chars: 11,
                        sentences: 1,
                        version: 1,
                        ..FileStats::default()
                    }
                    .to_wire(),
                ),
                Ok(ControlCommand::Undo { file }) => {
                    if undone.insert(file.clone()) {
                        Response::ok(format!("Undo applied to '{}'", file))
                    } else {
                        Response::from_error(&DfsError::NothingToUndo(file))
                    }
                }
                Ok(ControlCommand::Exec { .. }) => Response::ok("$ echo hi\nhi\n[exit status: 0]"),
                Err(err) => Response::from_error(&err),
            };
            if write_frame(&mut writer, &response).await.is_err() {
                break;
            }
        }
    }

    async fn attach_storage(service: &NamingService, port: u16, files: Vec<(String, String)>) -> StorageId {
        let (nm_side, ss_side) = connected_pair().await;
        tokio::spawn(fake_storage(ss_side));

        let (read_half, write_half) = nm_side.into_split();
        service
            .register_storage(
                "127.0.0.1".parse().unwrap(),
                port,
                files,
                (BufReader::new(read_half), write_half),
            )
            .await
            .id
    }

    // ============================================================
    // TYPES & PROTOCOL TESTS
    // ============================================================

    #[test]
    fn test_permission_flags() {
        assert_eq!(Permission::from_flag("-R").unwrap(), Permission::Read);
        assert_eq!(Permission::from_flag("-w").unwrap(), Permission::Write);
        assert_eq!(Permission::from_flag("-X").unwrap_err().code(), 7);
    }

    #[test]
    fn test_write_implies_read() {
        assert!(Access::Write.allows(Permission::Read));
        assert!(Access::Owner.allows(Permission::Write));
        assert!(!Access::Read.allows(Permission::Write));
        assert!(!Access::None.allows(Permission::Read));
    }

    #[test]
    fn test_parse_view_flags() {
        assert_eq!(NmCommand::parse("VIEW").unwrap(), NmCommand::View { all: false, long: false });
        assert_eq!(NmCommand::parse("view -a -l").unwrap(), NmCommand::View { all: true, long: true });
        assert_eq!(NmCommand::parse("VIEW -la").unwrap(), NmCommand::View { all: true, long: true });
        assert_eq!(NmCommand::parse("VIEW -x").unwrap_err().code(), 7);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            NmCommand::parse("ADDACCESS -W notes.txt bob").unwrap(),
            NmCommand::AddAccess {
                perm: Permission::Write,
                file: "notes.txt".to_string(),
                user: "bob".to_string(),
            }
        );
        assert_eq!(
            NmCommand::parse("WRITE notes.txt 100").unwrap(),
            NmCommand::Write {
                file: "notes.txt".to_string(),
                sentence: 100,
            }
        );
        assert_eq!(NmCommand::parse("EXIT").unwrap(), NmCommand::Quit);
        assert_eq!(NmCommand::parse("WRITE notes.txt first").unwrap_err().code(), 7);
        assert_eq!(NmCommand::parse("CREATE").unwrap_err().code(), 7);
        assert_eq!(NmCommand::parse("REGISTER_CLIENT a 1 2").unwrap_err().code(), 7);
        assert_eq!(NmCommand::parse("FLY away").unwrap_err().code(), 7);
    }

    #[test]
    fn test_parse_register_client() {
        let registration = RegisterClient::parse(&["alice", "9001", "9002"]).unwrap();
        assert_eq!(registration.username, "alice");
        assert_eq!(registration.ss_port, 9002);

        assert!(RegisterClient::parse(&["alice", "port", "9002"]).is_err());
        assert!(RegisterClient::parse(&["alice"]).is_err());
    }

    // ============================================================
    // SESSION REGISTRY TESTS
    // ============================================================

    #[test]
    fn test_duplicate_username_is_rejected() {
        let registry = SessionRegistry::new();
        let _alice = registry.register("alice", 1, 2, peer()).unwrap();

        let err = registry.register("alice", 3, 4, peer()).err().unwrap();
        assert!(matches!(err, DfsError::AlreadyExists(_)));
        assert_eq!(registry.lookup("alice").unwrap().nm_port, 1);
    }

    #[test]
    fn test_dropping_handle_deregisters() {
        let registry = SessionRegistry::new();
        {
            let _alice = registry.register("alice", 1, 2, peer()).unwrap();
            assert!(registry.is_live("alice"));
        }

        assert!(!registry.is_live("alice"));
        assert!(registry.is_known("alice"));
        assert!(registry.register("alice", 1, 2, peer()).is_ok());
    }

    #[test]
    fn test_stale_deregister_keeps_new_session() {
        let registry = SessionRegistry::new();
        let first = registry.register("alice", 1, 2, peer()).unwrap();
        drop(first);
        let _second = registry.register("alice", 1, 2, peer()).unwrap();

        // Session id 0 belonged to the first session
        assert!(!registry.deregister("alice", 0));
        assert!(registry.is_live("alice"));
    }

    #[test]
    fn test_users_marks_online() {
        let registry = SessionRegistry::new();
        let _alice = registry.register("alice", 1, 2, peer()).unwrap();
        drop(registry.register("bob", 1, 2, peer()).unwrap());

        assert_eq!(
            registry.users(),
            vec![("alice".to_string(), true), ("bob".to_string(), false)]
        );
        assert_eq!(registry.live_count(), 1);
    }

    // ============================================================
    // FILE CATALOG TESTS
    // ============================================================

    fn catalog_with(files: &[(&str, &str)]) -> FileCatalog {
        let catalog = FileCatalog::new();
        for (name, owner) in files {
            catalog
                .insert(FileRecord::new(name, owner, StorageId(1), 0))
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_grant_replaces_and_revoke_removes() {
        let catalog = catalog_with(&[("a.txt", "alice")]);

        catalog.grant("a.txt", "alice", "bob", Permission::Write).unwrap();
        assert!(catalog.check_access("a.txt", "bob", Permission::Write).is_ok());

        catalog.grant("a.txt", "alice", "bob", Permission::Read).unwrap();
        assert_eq!(
            catalog.check_access("a.txt", "bob", Permission::Write).unwrap_err().code(),
            9
        );

        catalog.revoke("a.txt", "alice", "bob").unwrap();
        assert_eq!(catalog.get("a.txt").unwrap().access_for("bob"), Access::None);
        assert_eq!(catalog.revoke("a.txt", "alice", "bob").unwrap_err().code(), 1);
    }

    #[test]
    fn test_only_owner_changes_grants() {
        let catalog = catalog_with(&[("a.txt", "alice")]);

        let err = catalog.grant("a.txt", "bob", "carol", Permission::Read).unwrap_err();
        assert!(matches!(err, DfsError::PermissionDenied(_)));
        assert_eq!(
            catalog.grant("a.txt", "alice", "alice", Permission::Read).unwrap_err().code(),
            7
        );
        assert_eq!(
            catalog.grant("nope.txt", "alice", "bob", Permission::Read).unwrap_err().code(),
            1
        );
    }

    #[test]
    fn test_visibility_policies() {
        let catalog = catalog_with(&[("mine.txt", "bob"), ("shared.txt", "alice"), ("private.txt", "alice")]);
        catalog.grant("shared.txt", "alice", "bob", Permission::Read).unwrap();

        let names = |files: Vec<FileRecord>| files.into_iter().map(|f| f.name).collect::<Vec<_>>();

        assert_eq!(
            names(catalog.visible_to("bob", false, ViewAllPolicy::BypassAcl)),
            vec!["mine.txt", "shared.txt"]
        );
        assert_eq!(
            names(catalog.visible_to("bob", true, ViewAllPolicy::BypassAcl)),
            vec!["mine.txt", "private.txt", "shared.txt"]
        );
        assert_eq!(
            names(catalog.visible_to("bob", false, ViewAllPolicy::OwnershipOnly)),
            vec!["mine.txt"]
        );
        assert_eq!(
            names(catalog.visible_to("bob", true, ViewAllPolicy::OwnershipOnly)),
            vec!["mine.txt", "shared.txt"]
        );
    }

    #[test]
    fn test_adopt_keeps_existing_assignment() {
        let catalog = catalog_with(&[("a.txt", "alice")]);

        assert!(!catalog.adopt("a.txt", "mallory", StorageId(2)));
        assert!(catalog.adopt("b.txt", "bob", StorageId(2)));

        let a = catalog.get("a.txt").unwrap();
        assert_eq!(a.owner, "alice");
        assert_eq!(a.storage, StorageId(1));
        assert_eq!(catalog.count_on(StorageId(2)), 1);
    }

    // ============================================================
    // NAMING SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_create_without_storage_fails() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        let _alice = login(&service, "alice");

        let response = run(&service, "alice", "CREATE a.txt").await;
        assert_eq!(response.code, 5);
        assert!(service.catalog.is_empty());
    }

    #[tokio::test]
    async fn test_create_delete_lifecycle() {
        // ARRANGE
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        let _bob = login(&service, "bob");

        // ACT & ASSERT
        let created = run(&service, "alice", "CREATE notes.txt").await;
        assert_eq!(created, Response::ok("File 'notes.txt' created successfully"));

        assert_eq!(run(&service, "bob", "CREATE notes.txt").await.code, 3);
        assert_eq!(run(&service, "bob", "DELETE notes.txt").await.code, 9);
        assert_eq!(run(&service, "alice", "CREATE .secret").await.code, 7);

        assert!(run(&service, "alice", "DELETE notes.txt").await.is_success());
        assert_eq!(run(&service, "alice", "INFO notes.txt").await.code, 1);
    }

    #[tokio::test]
    async fn test_access_grants_drive_redirects() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        let _bob = login(&service, "bob");
        run(&service, "alice", "CREATE notes.txt").await;

        assert_eq!(run(&service, "bob", "READ notes.txt").await.code, 9);

        assert!(run(&service, "alice", "ADDACCESS -R notes.txt bob").await.is_success());
        assert_eq!(
            run(&service, "bob", "READ notes.txt").await.message,
            "SS_INFO 127.0.0.1 9100"
        );
        assert_eq!(run(&service, "bob", "WRITE notes.txt 0").await.code, 9);

        assert!(run(&service, "alice", "ADDACCESS -W notes.txt bob").await.is_success());
        assert!(run(&service, "bob", "WRITE notes.txt 0").await.is_success());
        assert!(run(&service, "bob", "STREAM notes.txt").await.is_success());

        assert!(run(&service, "alice", "REMACCESS notes.txt bob").await.is_success());
        assert_eq!(run(&service, "bob", "READ notes.txt").await.code, 9);

        assert_eq!(run(&service, "alice", "ADDACCESS -R notes.txt carol").await.code, 1);
        assert_eq!(run(&service, "alice", "ADDACCESS -R notes.txt alice").await.code, 7);
        assert_eq!(run(&service, "bob", "ADDACCESS -R notes.txt bob").await.code, 9);
    }

    #[tokio::test]
    async fn test_info_shows_acl_to_owner_only() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        let _bob = login(&service, "bob");
        run(&service, "alice", "CREATE notes.txt").await;
        run(&service, "alice", "ADDACCESS -W notes.txt bob").await;

        let owner_view = run(&service, "alice", "INFO notes.txt").await.message;
        assert!(owner_view.contains("Owner: alice"));
        assert!(owner_view.contains("Words: 2"));
        assert!(owner_view.contains("Access List:"));
        assert!(owner_view.contains("bob: WRITE"));

        let grantee_view = run(&service, "bob", "INFO notes.txt").await.message;
        assert!(grantee_view.contains("Your Access: read/write"));
        assert!(!grantee_view.contains("Access List:"));
    }

    #[tokio::test]
    async fn test_undo_is_owner_only_and_single_level() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        let _bob = login(&service, "bob");
        run(&service, "alice", "CREATE notes.txt").await;
        run(&service, "alice", "ADDACCESS -W notes.txt bob").await;

        assert_eq!(run(&service, "bob", "UNDO notes.txt").await.code, 9);
        assert!(run(&service, "alice", "UNDO notes.txt").await.is_success());

        let second = run(&service, "alice", "UNDO notes.txt").await;
        assert_eq!(second.code, 13, "NothingToUndo is relayed from the storage server");
    }

    #[tokio::test]
    async fn test_view_and_list_output() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        drop(login(&service, "bob"));

        assert_eq!(run(&service, "alice", "VIEW").await.message, "No files found");

        run(&service, "alice", "CREATE b.txt").await;
        run(&service, "alice", "CREATE a.txt").await;
        assert_eq!(run(&service, "alice", "VIEW").await.message, "a.txt\nb.txt");

        let long = run(&service, "alice", "VIEW -l").await.message;
        let lines: Vec<&str> = long.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("OWNER") && lines[0].contains("NAME"));
        assert!(lines[1].starts_with("alice") && lines[1].ends_with("a.txt"));

        assert_eq!(run(&service, "alice", "LIST").await.message, "alice (online)\nbob");
    }

    #[tokio::test]
    async fn test_exec_output_is_relayed() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        attach_storage(&service, 9100, vec![]).await;
        let _alice = login(&service, "alice");
        run(&service, "alice", "CREATE script.txt").await;

        let response = run(&service, "alice", "EXEC script.txt").await;
        assert!(response.is_success());
        assert_eq!(response.message, "$ echo hi\nhi\n[exit status: 0]");
    }

    #[tokio::test]
    async fn test_placement_prefers_least_loaded_storage() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        let first = attach_storage(&service, 9100, vec![]).await;
        let second = attach_storage(&service, 9200, vec![]).await;
        let _alice = login(&service, "alice");

        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            assert!(run(&service, "alice", &format!("CREATE {}", name)).await.is_success());
        }

        assert_eq!(service.catalog.count_on(first), 2);
        assert_eq!(service.catalog.count_on(second), 2);
    }

    #[tokio::test]
    async fn test_registration_adopts_reported_files_and_reuses_id() {
        let service = service_with(ViewAllPolicy::BypassAcl);
        let files = vec![("alice".to_string(), "old.txt".to_string())];

        let id = attach_storage(&service, 9100, files.clone()).await;
        assert_eq!(service.catalog.get("old.txt").unwrap().owner, "alice");

        let again = attach_storage(&service, 9100, files).await;
        assert_eq!(id, again);
        assert_eq!(service.storages.len(), 1);
        assert_eq!(service.catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_forward_marks_storage_inactive() {
        // ARRANGE: a storage server that hangs up immediately
        let service = service_with(ViewAllPolicy::BypassAcl);
        let (nm_side, ss_side) = connected_pair().await;
        drop(ss_side);
        let (read_half, write_half) = nm_side.into_split();
        service
            .register_storage(
                "127.0.0.1".parse().unwrap(),
                9100,
                vec![("alice".to_string(), "old.txt".to_string())],
                (BufReader::new(read_half), write_half),
            )
            .await;
        let _alice = login(&service, "alice");

        // ACT
        let first = run(&service, "alice", "CREATE a.txt").await;
        let second = run(&service, "alice", "CREATE b.txt").await;

        // ASSERT
        assert_eq!(first.code, 8);
        assert_eq!(second.code, 5);
        assert!(service.storages.active_links().is_empty());
        assert_eq!(run(&service, "alice", "READ old.txt").await.code, 5);
    }

    #[tokio::test]
    async fn test_quit_closes_session() {
        let service = service_with(ViewAllPolicy::BypassAcl);

        let outcome = service.handle_line("alice", "QUIT").await;
        assert!(outcome.close);
        assert_eq!(outcome.response, Response::ok("Goodbye!"));

        let unknown = service.handle_line("alice", "HELLO").await;
        assert!(!unknown.close);
        assert_eq!(unknown.response.code, 7);
    }
}

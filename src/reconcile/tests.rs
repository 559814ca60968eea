use super::*;
use crate::store::destinations::DestinationRecord;
use crate::store::grants::list_grants;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

fn setup() -> (Store, Reconciler) {
    let store = Store::open_in_memory().unwrap();
    let reconciler = Reconciler::new(SecretCipher::from_bytes(&[0u8; 32]).unwrap());
    (store, reconciler)
}

fn provider(name: &str, url: &str, client_id: &str, client_secret: &str) -> ProviderEntry {
    ProviderEntry {
        name: name.to_string(),
        url: url.to_string(),
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
        kind: None,
    }
}

fn user_grant(user: &str, role: Option<&str>, resource: &str) -> GrantEntry {
    GrantEntry {
        user: Some(user.to_string()),
        group: None,
        resource: resource.to_string(),
        role: role.map(str::to_string),
    }
}

fn group_grant(group: &str, role: &str, resource: &str) -> GrantEntry {
    GrantEntry {
        user: None,
        group: Some(group.to_string()),
        resource: resource.to_string(),
        role: Some(role.to_string()),
    }
}

fn named(name: &str) -> UserEntry {
    UserEntry {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn grants_for(conn: &Connection, subject: Subject) -> Result<Vec<grant_rows::Grant>> {
    Ok(list_grants(conn)?
        .into_iter()
        .filter(|g| g.subject == subject)
        .collect())
}

/// A key created at runtime with a chosen ID, as an API-issued key would be.
fn runtime_key(conn: &Connection, identity: &Identity, key: &str) -> Result<()> {
    let (key_id, secret) = bearer::parse_access_key(key)?;
    keys::insert_access_key(
        conn,
        &AccessKey {
            key_id: key_id.to_string(),
            name: None,
            secret_checksum: bearer::digest(secret),
            issued_for: identity.id,
            expires_at: None,
            provenance: Provenance::Runtime,
            created_at: Utc::now(),
        },
    )
}

fn key_verifies(store: &Store, key: &str) -> bool {
    store
        .read(|conn| credentials::verify_bearer(conn, key, Utc::now()))
        .is_ok()
}

fn password_verifies(store: &Store, name: &str, password: &str) -> bool {
    store
        .read(|conn| credentials::lookup_password_login(conn, name))
        .unwrap()
        .verify(password)
        .is_ok()
}

fn count(store: &Store, table: &str) -> i64 {
    store.read(|conn| count_rows(conn, table)).unwrap()
}

fn privilege_histogram(store: &Store) -> HashMap<String, usize> {
    let mut histogram = HashMap::new();
    for grant in store.read(list_grants).unwrap() {
        *histogram.entry(grant.privilege).or_insert(0) += 1;
    }
    histogram
}

#[test]
fn test_empty_config_keeps_anchors() {
    let (store, reconciler) = setup();
    reconciler.apply(&store, &DeclaredConfig::default()).unwrap();

    assert_eq!(count(&store, "providers"), 1);
    assert_eq!(count(&store, "grants"), 1);

    store
        .read(|conn| {
            let infra = providers::get_provider_by_name(conn, INTERNAL_PROVIDER_NAME)?.unwrap();
            assert_eq!(infra.kind, ProviderKind::Infra);
            assert!(infra.client_secret.is_none());

            let connector = identities::get_identity_by_name(conn, CONNECTOR_IDENTITY_NAME)?.unwrap();
            assert_eq!(connector.kind, IdentityKind::Machine);
            assert!(grants::has_privilege(
                conn,
                connector.id,
                INFRA_RESOURCE,
                grants::Required::Privilege(privilege::CONNECTOR)
            )?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_invalid_configs_fail_without_effect() {
    let cases: Vec<(&str, DeclaredConfig)> = vec![
        (
            "missing provider name",
            DeclaredConfig {
                providers: vec![provider("", "demo.okta.com", "client-id", "client-secret")],
                ..Default::default()
            },
        ),
        (
            "missing provider url",
            DeclaredConfig {
                providers: vec![provider("okta", "", "client-id", "client-secret")],
                ..Default::default()
            },
        ),
        (
            "missing provider client id",
            DeclaredConfig {
                providers: vec![provider("okta", "demo.okta.com", "", "client-secret")],
                ..Default::default()
            },
        ),
        (
            "missing provider client secret",
            DeclaredConfig {
                providers: vec![provider("okta", "demo.okta.com", "client-id", "")],
                ..Default::default()
            },
        ),
        (
            "reserved provider name",
            DeclaredConfig {
                providers: vec![provider("infra", "demo.okta.com", "client-id", "client-secret")],
                ..Default::default()
            },
        ),
        (
            "unknown provider kind",
            DeclaredConfig {
                providers: vec![ProviderEntry {
                    kind: Some("saml".to_string()),
                    ..provider("okta", "demo.okta.com", "client-id", "client-secret")
                }],
                ..Default::default()
            },
        ),
        (
            "missing grant subject",
            DeclaredConfig {
                grants: vec![GrantEntry {
                    resource: "test-cluster".to_string(),
                    role: Some("admin".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "grant with two subjects",
            DeclaredConfig {
                grants: vec![GrantEntry {
                    user: Some("bob".to_string()),
                    group: Some("Everyone".to_string()),
                    resource: "test-cluster".to_string(),
                    role: None,
                }],
                ..Default::default()
            },
        ),
        (
            "missing grant resource",
            DeclaredConfig {
                grants: vec![user_grant("bob", Some("admin"), "")],
                ..Default::default()
            },
        ),
        (
            "user without name or email",
            DeclaredConfig {
                users: vec![UserEntry {
                    password: Some("password".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "malformed access key",
            DeclaredConfig {
                users: vec![UserEntry {
                    access_key: Some("not-a-key".to_string()),
                    ..named("bob")
                }],
                ..Default::default()
            },
        ),
    ];

    for (name, config) in cases {
        let (store, reconciler) = setup();
        let result = reconciler.apply(&store, &config);
        assert!(
            matches!(result, Err(Error::Validation { .. })),
            "{}: expected validation error, got {:?}",
            name,
            result
        );
        assert_eq!(count(&store, "providers"), 0, "{}", name);
        assert_eq!(count(&store, "identities"), 0, "{}", name);
    }
}

#[test]
fn test_validation_error_names_entity_and_field() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        providers: vec![provider("okta", "demo.okta.com", "client-id", "")],
        ..Default::default()
    };
    let err = reconciler.apply(&store, &config).unwrap_err();
    assert_eq!(err.to_string(), "invalid provider \"okta\": clientSecret is required");
}

#[test]
fn test_providers_are_sealed_and_kind_defaults_to_oidc() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        providers: vec![
            provider("okta", "demo.okta.com", "client-id", "client-secret"),
            ProviderEntry {
                kind: Some("azure".to_string()),
                ..provider("azure", "demo.azure.com", "client-id", "client-secret")
            },
        ],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();

    let cipher = SecretCipher::from_bytes(&[0u8; 32]).unwrap();
    store
        .read(|conn| {
            let okta = providers::get_provider_by_name(conn, "okta")?.unwrap();
            assert_eq!(okta.url, "demo.okta.com");
            assert_eq!(okta.client_id, "client-id");
            assert_eq!(okta.kind, ProviderKind::Oidc);
            let sealed = okta.client_secret.unwrap();
            assert_ne!(sealed.ciphertext, "client-secret");
            assert_eq!(cipher.open(&sealed)?, "client-secret");

            let azure = providers::get_provider_by_name(conn, "azure")?.unwrap();
            assert_eq!(azure.url, "demo.azure.com");
            assert_eq!(azure.kind, ProviderKind::Azure);
            assert_eq!(cipher.open(&azure.client_secret.unwrap())?, "client-secret");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_users_with_passwords_and_access_keys() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        users: vec![
            named("bob"),
            UserEntry {
                password: Some("password".to_string()),
                ..named("alice")
            },
            UserEntry {
                access_key: Some("aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb".to_string()),
                ..named("sue")
            },
            UserEntry {
                password: Some("password".to_string()),
                access_key: Some("bbbbbbbbbb.bbbbbbbbbbbbbbbbbbbbbbbb".to_string()),
                ..named("jim")
            },
        ],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();

    let expected_digest = Sha256::digest(b"bbbbbbbbbbbbbbbbbbbbbbbb").to_vec();
    store
        .read(|conn| {
            let bob = identities::get_identity_by_name(conn, "bob")?.unwrap();
            assert_eq!(bob.provenance, Provenance::Config);
            assert!(identities::get_password_hash(conn, bob.id)?.is_none());

            let alice = identities::get_identity_by_name(conn, "alice")?.unwrap();
            let hash = identities::get_password_hash(conn, alice.id)?.unwrap();
            assert!(credentials::verify_password(&hash, "password"));

            let sue = identities::get_identity_by_name(conn, "sue")?.unwrap();
            let key = keys::get_access_key(conn, "aaaaaaaaaa")?.unwrap();
            assert_eq!(key.issued_for, sue.id);
            assert_eq!(key.secret_checksum, expected_digest);

            let jim = identities::get_identity_by_name(conn, "jim")?.unwrap();
            let hash = identities::get_password_hash(conn, jim.id)?.unwrap();
            assert!(credentials::verify_password(&hash, "password"));
            let key = keys::get_access_key(conn, "bbbbbbbbbb")?.unwrap();
            assert_eq!(key.issued_for, jim.id);
            assert_eq!(key.secret_checksum, expected_digest);

            let verified = credentials::verify_bearer(conn, "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb", Utc::now())?;
            assert_eq!(verified.identity.name, "sue");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_grant_without_role_gets_connect() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        grants: vec![user_grant("test@example.com", None, "test-cluster")],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();

    store
        .read(|conn| {
            assert!(providers::get_provider_by_name(conn, INTERNAL_PROVIDER_NAME)?.is_some());
            let user = identities::get_identity_by_name(conn, "test@example.com")?.unwrap();
            let grants = grants_for(conn, Subject::Identity(user.id))?;
            assert_eq!(grants.len(), 1);
            assert_eq!(grants[0].privilege, "connect");
            assert_eq!(grants[0].resource, "test-cluster");
            assert_eq!(grants[0].origin, GrantOrigin::Config);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_user_and_group_grants() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        grants: vec![
            user_grant("test@example.com", Some("admin"), "test-cluster"),
            group_grant("Everyone", "admin", "test-cluster"),
        ],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();

    store
        .read(|conn| {
            let user = identities::get_identity_by_name(conn, "test@example.com")?.unwrap();
            let grants = grants_for(conn, Subject::Identity(user.id))?;
            assert_eq!(grants[0].privilege, "admin");

            let group = groups::get_by_name(conn, "Everyone")?.unwrap();
            let grants = grants_for(conn, Subject::Group(group.id))?;
            assert_eq!(grants.len(), 1);
            assert_eq!(grants[0].privilege, "admin");
            assert_eq!(grants[0].resource, "test-cluster");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_reapply_prunes_undeclared() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        providers: vec![provider("okta", "demo.okta.com", "client-id", "client-secret")],
        grants: vec![
            user_grant("test@example.com", Some("admin"), "test-cluster"),
            group_grant("Everyone", "admin", "test-cluster"),
        ],
        ..Default::default()
    };
    let summary = reconciler.apply(&store, &config).unwrap();
    assert_eq!(
        summary,
        ReconcileSummary {
            providers: 2,
            identities: 2,
            groups: 1,
            grants: 3
        }
    );

    let updated = DeclaredConfig {
        providers: vec![provider("okta", "new-demo.okta.com", "new-client-id", "new-client-secret")],
        ..Default::default()
    };
    reconciler.apply(&store, &updated).unwrap();

    assert_eq!(count(&store, "providers"), 2);
    assert_eq!(count(&store, "grants"), 1);
    assert_eq!(count(&store, "identities"), 1);
    assert_eq!(count(&store, "groups"), 0);

    store
        .read(|conn| {
            let okta = providers::get_provider_by_name(conn, "okta")?.unwrap();
            assert_eq!(okta.url, "new-demo.okta.com");
            assert_eq!(okta.client_id, "new-client-id");
            let remaining = identities::list_identities(conn)?;
            assert_eq!(remaining[0].name, CONNECTOR_IDENTITY_NAME);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_update_replaces_declared_set() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        providers: vec![provider("okta", "demo.okta.com", "client-id", "client-secret")],
        users: vec![
            named("r2d2"),
            UserEntry {
                access_key: Some("TllVlekkUz.NFnxSlaPQLosgkNsyzaMttfC".to_string()),
                ..named("c3po")
            },
            UserEntry {
                email: Some("john@email.com".to_string()),
                ..Default::default()
            },
            UserEntry {
                email: Some("sarah@email.com".to_string()),
                password: Some("supersecret".to_string()),
                ..Default::default()
            },
        ],
        grants: vec![
            user_grant("test@example.com", Some("admin"), "test-cluster"),
            group_grant("Everyone", "admin", "test-cluster"),
        ],
    };
    reconciler.apply(&store, &config).unwrap();

    assert_eq!(count(&store, "providers"), 2);
    assert_eq!(count(&store, "grants"), 3);
    let histogram = privilege_histogram(&store);
    assert_eq!(histogram.get("admin"), Some(&2));
    assert_eq!(histogram.get("view"), None);
    assert_eq!(histogram.get("connector"), Some(&1));
    assert_eq!(count(&store, "identities"), 6);
    assert_eq!(count(&store, "groups"), 1);
    assert_eq!(count(&store, "credentials"), 1);
    assert_eq!(count(&store, "access_keys"), 1);

    let everyone_id = store
        .read(|conn| Ok(groups::get_by_name(conn, "Everyone")?.unwrap().id))
        .unwrap();

    let updated = DeclaredConfig {
        providers: vec![provider("atko", "demo.atko.com", "client-id-2", "client-secret-2")],
        grants: vec![
            user_grant("test@example.com", Some("view"), "test-cluster"),
            group_grant("Everyone", "view", "test-cluster"),
        ],
        ..Default::default()
    };
    reconciler.apply(&store, &updated).unwrap();

    assert_eq!(count(&store, "providers"), 2);
    assert_eq!(count(&store, "grants"), 3);
    let histogram = privilege_histogram(&store);
    assert_eq!(histogram.get("admin"), None);
    assert_eq!(histogram.get("view"), Some(&2));
    assert_eq!(histogram.get("connector"), Some(&1));
    assert_eq!(count(&store, "identities"), 2);
    assert_eq!(count(&store, "groups"), 1);
    assert_eq!(count(&store, "credentials"), 0);
    assert_eq!(count(&store, "access_keys"), 0);

    let cipher = SecretCipher::from_bytes(&[0u8; 32]).unwrap();
    store
        .read(|conn| {
            assert!(providers::get_provider_by_name(conn, "okta")?.is_none());
            let atko = providers::get_provider_by_name(conn, "atko")?.unwrap();
            assert_eq!(atko.url, "demo.atko.com");
            assert_eq!(atko.client_id, "client-id-2");
            assert_eq!(cipher.open(&atko.client_secret.unwrap())?, "client-secret-2");

            assert!(identities::get_identity_by_name(conn, "test@example.com")?.is_some());
            let everyone = groups::get_by_name(conn, "Everyone")?.unwrap();
            assert_eq!(everyone.id, everyone_id);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_apply_is_idempotent() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        providers: vec![provider("okta", "demo.okta.com", "client-id", "client-secret")],
        users: vec![UserEntry {
            access_key: Some("aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb".to_string()),
            ..named("sue")
        }],
        grants: vec![
            user_grant("sue", Some("admin"), "test-cluster"),
            group_grant("Everyone", "view", "test-cluster"),
        ],
    };

    let first = reconciler.apply(&store, &config).unwrap();
    let okta_before = store
        .read(|conn| Ok(providers::get_provider_by_name(conn, "okta")?.unwrap()))
        .unwrap();

    let second = reconciler.apply(&store, &config).unwrap();
    let okta_after = store
        .read(|conn| Ok(providers::get_provider_by_name(conn, "okta")?.unwrap()))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(count(&store, "access_keys"), 1);
    assert_eq!(okta_before.id, okta_after.id);
    assert_eq!(okta_before.url, okta_after.url);
    assert_eq!(okta_before.client_id, okta_after.client_id);
    assert_eq!(okta_before.kind, okta_after.kind);

    let tuples = |store: &Store| -> Vec<(String, String, String)> {
        store
            .read(list_grants)
            .unwrap()
            .into_iter()
            .map(|g| (g.subject.to_string(), g.resource, g.privilege))
            .collect()
    };
    let mut before = tuples(&store);
    reconciler.apply(&store, &config).unwrap();
    let mut after = tuples(&store);
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn test_runtime_rows_survive_reconciliation() {
    let (store, reconciler) = setup();
    store
        .transaction(|tx| {
            grants::register_destination(
                tx,
                &DestinationRecord {
                    name: "prod".to_string(),
                    kind: "kubernetes".to_string(),
                    endpoint: "https://10.0.0.1".to_string(),
                    ca: String::new(),
                },
            )?;
            let admin = grants::create_identity(tx, &NewIdentity::user("admin", Provenance::Runtime))?;
            identities::set_password_hash(tx, admin.id, &credentials::hash_new_password("password123")?)?;
            groups::find_or_create(tx, "synced", Provenance::Runtime)?;
            Ok(())
        })
        .unwrap();

    let config = DeclaredConfig {
        grants: vec![user_grant("test@example.com", Some("admin"), "test-cluster")],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();
    reconciler.apply(&store, &DeclaredConfig::default()).unwrap();

    store
        .read(|conn| {
            let admin = identities::get_identity_by_name(conn, "admin")?.unwrap();
            assert!(identities::get_password_hash(conn, admin.id)?.is_some());
            assert!(grants::has_privilege(conn, admin.id, "prod", grants::Required::Privilege("view"))?);
            assert!(groups::get_by_name(conn, "synced")?.is_some());
            assert!(identities::get_identity_by_name(conn, "test@example.com")?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_declaring_runtime_identity_adopts_without_pruning_it() {
    let (store, reconciler) = setup();
    store
        .transaction(|tx| grants::create_identity(tx, &NewIdentity::user("bob", Provenance::Runtime)))
        .unwrap();

    let config = DeclaredConfig {
        grants: vec![user_grant("bob", Some("admin"), "test-cluster")],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();
    reconciler.apply(&store, &DeclaredConfig::default()).unwrap();

    store
        .read(|conn| {
            let bob = identities::get_identity_by_name(conn, "bob")?.unwrap();
            assert_eq!(bob.provenance, Provenance::Runtime);
            assert!(grants::effective_privileges(conn, bob.id, "test-cluster")?.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_conflict_midway_rolls_back_everything() {
    let (store, reconciler) = setup();
    store
        .transaction(|tx| {
            let bob = grants::create_identity(tx, &NewIdentity::user("bob", Provenance::Runtime))?;
            runtime_key(tx, &bob, "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb")
        })
        .unwrap();
    reconciler.apply(&store, &DeclaredConfig::default()).unwrap();
    let grants_before = count(&store, "grants");

    let config = DeclaredConfig {
        providers: vec![provider("okta", "demo.okta.com", "client-id", "client-secret")],
        users: vec![UserEntry {
            access_key: Some("aaaaaaaaaa.cccccccccccccccccccccccc".to_string()),
            ..named("alice")
        }],
        grants: vec![user_grant("alice", Some("admin"), "test-cluster")],
    };
    let err = reconciler.apply(&store, &config).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert_eq!(count(&store, "providers"), 1);
    assert_eq!(count(&store, "grants"), grants_before);
    store
        .read(|conn| {
            assert!(identities::get_identity_by_name(conn, "alice")?.is_none());
            let verified = credentials::verify_bearer(conn, "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb", Utc::now())?;
            assert_eq!(verified.identity.name, "bob");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_load_access_key() {
    let (store, _) = setup();
    let test_access_key = "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb";

    store
        .transaction(|tx| {
            let bob = grants::create_identity(tx, &NewIdentity::user("bob", Provenance::Runtime))?;
            load_access_key(tx, &bob, test_access_key)?;

            // same identity: overwrite, no duplicate
            load_access_key(tx, &bob, test_access_key)?;
            assert_eq!(count_rows(tx, "access_keys")?, 1);

            let alice = grants::create_identity(tx, &NewIdentity::user("alice", Provenance::Runtime))?;
            let err = load_access_key(tx, &alice, test_access_key).unwrap_err();
            assert_eq!(
                err.to_string(),
                "access key assigned to \"alice\" is already assigned to another user, a user's access key must have a unique ID"
            );
            assert_eq!(keys::get_access_key(tx, "aaaaaaaaaa")?.unwrap().issued_for, bob.id);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_rotated_config_key_replaces_the_old_one() {
    let (store, reconciler) = setup();
    let old_key = "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb";
    let new_key = "cccccccccc.dddddddddddddddddddddddd";
    let with_key = |key: Option<&str>| DeclaredConfig {
        users: vec![UserEntry {
            access_key: key.map(str::to_string),
            ..named("c3po")
        }],
        ..Default::default()
    };

    reconciler.apply(&store, &with_key(Some(old_key))).unwrap();
    assert!(key_verifies(&store, old_key));

    reconciler.apply(&store, &with_key(Some(new_key))).unwrap();
    assert!(!key_verifies(&store, old_key));
    assert!(key_verifies(&store, new_key));

    reconciler.apply(&store, &with_key(None)).unwrap();
    assert!(!key_verifies(&store, new_key));
    assert_eq!(count(&store, "access_keys"), 0);
}

#[test]
fn test_runtime_keys_survive_config_key_changes() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        users: vec![UserEntry {
            access_key: Some("aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb".to_string()),
            ..named("c3po")
        }],
        ..Default::default()
    };
    reconciler.apply(&store, &config).unwrap();

    let issued = store
        .transaction(|tx| {
            let c3po = identities::get_identity_by_name(tx, "c3po")?.unwrap();
            credentials::issue_access_key(tx, c3po.id, Some("ci"), None)
        })
        .unwrap();

    reconciler
        .apply(&store, &DeclaredConfig { users: vec![named("c3po")], ..Default::default() })
        .unwrap();
    assert!(!key_verifies(&store, "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb"));
    assert!(key_verifies(&store, &issued.bearer));
}

#[test]
fn test_config_key_can_move_between_users() {
    let (store, reconciler) = setup();
    let key = "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb";
    let holder = |name: &str| DeclaredConfig {
        users: vec![
            UserEntry {
                access_key: Some(key.to_string()),
                ..named(name)
            },
            named(if name == "c3po" { "r2d2" } else { "c3po" }),
        ],
        ..Default::default()
    };

    reconciler.apply(&store, &holder("c3po")).unwrap();
    reconciler.apply(&store, &holder("r2d2")).unwrap();

    let verified = store
        .read(|conn| credentials::verify_bearer(conn, key, Utc::now()))
        .unwrap();
    assert_eq!(verified.identity.name, "r2d2");
}

#[test]
fn test_dropped_password_no_longer_logs_in() {
    let (store, reconciler) = setup();
    reconciler
        .apply(
            &store,
            &DeclaredConfig {
                users: vec![UserEntry {
                    password: Some("supersecret".to_string()),
                    ..named("c3po")
                }],
                ..Default::default()
            },
        )
        .unwrap();
    assert!(password_verifies(&store, "c3po", "supersecret"));

    reconciler
        .apply(&store, &DeclaredConfig { users: vec![named("c3po")], ..Default::default() })
        .unwrap();
    assert!(!password_verifies(&store, "c3po", "supersecret"));
    assert_eq!(count(&store, "credentials"), 0);
}

#[test]
fn test_adopted_runtime_identity_keeps_its_password() {
    let (store, reconciler) = setup();
    store
        .transaction(|tx| {
            let bob = grants::create_identity(tx, &NewIdentity::user("bob", Provenance::Runtime))?;
            identities::set_password_hash(tx, bob.id, &credentials::hash_new_password("password123")?)
        })
        .unwrap();

    reconciler
        .apply(&store, &DeclaredConfig { users: vec![named("bob")], ..Default::default() })
        .unwrap();
    assert!(password_verifies(&store, "bob", "password123"));
}

#[test]
fn test_short_declared_password_is_rejected_before_writing() {
    let (store, reconciler) = setup();
    let config = DeclaredConfig {
        users: vec![UserEntry {
            password: Some("short".to_string()),
            ..named("c3po")
        }],
        ..Default::default()
    };
    let err = reconciler.apply(&store, &config).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(count(&store, "identities"), 0);
}

// Integration tests: declared config files applied to an on-disk store

use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use warden::config::DeclaredConfig;
use warden::credentials::{self, SecretCipher};
use warden::grants::{self, Required};
use warden::reconcile::{ensure_anchors, Reconciler};
use warden::store::identities::get_identity_by_name;
use warden::store::providers::get_provider_by_name;
use warden::{Error, Store};

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn reconciler() -> Reconciler {
    Reconciler::new(SecretCipher::from_bytes(&[0u8; 32]).unwrap())
}

const ACCESS_TOML: &str = r#"
[[providers]]
name = "okta"
url = "demo.okta.com"
clientId = "client-id"
clientSecret = "client-secret"
kind = "okta"

[[users]]
name = "admin@example.com"
password = "password123"
accessKey = "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb"

[[grants]]
user = "admin@example.com"
resource = "infra"
role = "admin"

[[grants]]
group = "Everyone"
resource = "prod"
role = "view"
"#;

#[test]
fn test_toml_document_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("warden.db");
    let document = write_config(".toml", ACCESS_TOML);

    {
        let store = Store::open(&db_path).unwrap();
        let desired = DeclaredConfig::load(document.path()).unwrap();
        let summary = reconciler().apply(&store, &desired).unwrap();
        assert_eq!(summary.providers, 2);
        assert_eq!(summary.groups, 1);
    }

    let store = Store::open(&db_path).unwrap();
    store
        .read(|conn| {
            let admin = get_identity_by_name(conn, "admin@example.com")?.unwrap();
            assert!(grants::has_privilege(conn, admin.id, "infra", Required::Privilege("admin"))?);

            credentials::lookup_password_login(conn, "admin@example.com")?.verify("password123")?;
            let verified = credentials::verify_bearer(conn, "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb", chrono::Utc::now())?;
            assert_eq!(verified.identity.id, admin.id);

            let okta = get_provider_by_name(conn, "okta")?.unwrap();
            let sealed = okta.client_secret.unwrap();
            assert_ne!(sealed.ciphertext, "client-secret");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_json_document_replaces_toml_document() {
    let store = Store::open_in_memory().unwrap();
    let first = write_config(".toml", ACCESS_TOML);
    reconciler()
        .apply(&store, &DeclaredConfig::load(first.path()).unwrap())
        .unwrap();

    let second = write_config(
        ".json",
        r#"{
            "users": [{"email": "ops@example.com"}],
            "grants": [{"user": "ops@example.com", "resource": "prod"}]
        }"#,
    );
    let summary = reconciler()
        .apply(&store, &DeclaredConfig::load(second.path()).unwrap())
        .unwrap();
    // internal provider only; connector and ops identities; no groups;
    // connector grant plus the ops connect grant
    assert_eq!(summary.providers, 1);
    assert_eq!(summary.identities, 2);
    assert_eq!(summary.groups, 0);
    assert_eq!(summary.grants, 2);

    store
        .read(|conn| {
            assert!(get_identity_by_name(conn, "admin@example.com")?.is_none());
            let ops = get_identity_by_name(conn, "ops@example.com")?.unwrap();
            assert!(grants::has_privilege(conn, ops.id, "prod", Required::Privilege("connect"))?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_invalid_document_leaves_store_unchanged() {
    let store = Store::open_in_memory().unwrap();
    store.transaction(|tx| ensure_anchors(tx)).unwrap();
    let first = write_config(".toml", ACCESS_TOML);
    let before = reconciler()
        .apply(&store, &DeclaredConfig::load(first.path()).unwrap())
        .unwrap();

    let broken = write_config(
        ".json",
        r#"{"grants": [{"user": "admin@example.com", "group": "Everyone", "resource": "prod"}]}"#,
    );
    let err = reconciler()
        .apply(&store, &DeclaredConfig::load(broken.path()).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let after = reconciler()
        .apply(&store, &DeclaredConfig::load(first.path()).unwrap())
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let file = write_config(".yaml", "users: []");
    assert!(DeclaredConfig::load(file.path()).is_err());
}

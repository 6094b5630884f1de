//! End-to-end acquisition tests against a local HTTP server.
//!
//! A version document is planted on disk pointing every URL at a mockito
//! server, then `ensure_version` runs for real: client jar, library,
//! asset index and asset objects all flow through the download manager.
//! Request counts on the mocks prove the idempotence and repair
//! behavior; no real network is involved.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use sha1::{Digest, Sha1};

use ember_core::event::{EventBus, LauncherEvent};
use ember_core::operation::{OperationKind, OperationState, Operations};
use ember_instances::ensure_version;

const VERSION_ID: &str = "1.20.4";
const CLIENT_BYTES: &[u8] = b"client jar bytes";
const LIBRARY_BYTES: &[u8] = b"library jar bytes";
const ASSET_ONE: &[u8] = b"asset number one";
const ASSET_TWO: &[u8] = b"asset number two";

/// One launcher root for the whole test binary; the `LAUNCHER_DIR`
/// static resolves once per process.
fn launcher_dir() -> &'static Path {
    static DIR: LazyLock<tempfile::TempDir> = LazyLock::new(|| {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("EMBER_LAUNCHER_DIR", dir.path());
        dir
    });
    DIR.path()
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn asset_object_path(hash: &str) -> std::path::PathBuf {
    launcher_dir()
        .join("assets/objects")
        .join(&hash[..2])
        .join(hash)
}

/// The whole acquisition lifecycle in one story: fresh install, then an
/// untouched re-run, then recovery from a corrupted asset. One test so
/// the mock hit counts stay exact.
#[tokio::test]
async fn acquisition_lifecycle() {
    let root = launcher_dir().to_path_buf();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("EMBER_RESOURCES_URL", server.url());

    let asset_one_hash = sha1_hex(ASSET_ONE);
    let asset_two_hash = sha1_hex(ASSET_TWO);
    let index_text = format!(
        r#"{{"objects": {{
            "minecraft/sounds/one.ogg": {{"hash": "{asset_one_hash}", "size": {}}},
            "minecraft/lang/two.json": {{"hash": "{asset_two_hash}", "size": {}}}
        }}}}"#,
        ASSET_ONE.len(),
        ASSET_TWO.len(),
    );

    // The version document already on disk: phase A stays offline and
    // every later phase fetches from the local server.
    let document = serde_json::json!({
        "assetIndex": {
            "id": "17",
            "sha1": sha1_hex(index_text.as_bytes()),
            "size": index_text.len(),
            "totalSize": ASSET_ONE.len() + ASSET_TWO.len(),
            "url": format!("{}/indexes/17.json", server.url()),
        },
        "assets": "17",
        "downloads": {
            "client": {
                "sha1": sha1_hex(CLIENT_BYTES),
                "size": CLIENT_BYTES.len(),
                "url": format!("{}/client.jar", server.url()),
            },
            "server": null,
        },
        "id": VERSION_ID,
        "javaVersion": {"component": "java-runtime-gamma", "majorVersion": 17},
        "libraries": [{
            "name": "com.example:demo:1.0",
            "downloads": {
                "artifact": {
                    "path": "com/example/demo/1.0/demo-1.0.jar",
                    "sha1": sha1_hex(LIBRARY_BYTES),
                    "size": LIBRARY_BYTES.len(),
                    "url": format!("{}/demo.jar", server.url()),
                },
                "classifiers": null,
            },
            "rules": null,
            "natives": null,
            "extract": null,
            "url": null,
        }],
        "mainClass": "net.minecraft.client.main.Main",
        "minecraftArguments": null,
        "arguments": null,
        "releaseTime": "2023-12-07T12:00:00+00:00",
        "time": "2023-12-07T12:00:00+00:00",
        "type": "release",
    });
    let doc_path = root.join(format!("versions/{VERSION_ID}/{VERSION_ID}.json"));
    tokio::fs::create_dir_all(doc_path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&doc_path, serde_json::to_vec_pretty(&document).unwrap())
        .await
        .unwrap();

    // Exact hit counts: everything once, except the asset we corrupt.
    let client_mock = server
        .mock("GET", "/client.jar")
        .with_body(CLIENT_BYTES)
        .expect(1)
        .create_async()
        .await;
    let library_mock = server
        .mock("GET", "/demo.jar")
        .with_body(LIBRARY_BYTES)
        .expect(1)
        .create_async()
        .await;
    let index_mock = server
        .mock("GET", "/indexes/17.json")
        .with_body(index_text.as_bytes())
        .expect(1)
        .create_async()
        .await;
    let asset_one_mock = server
        .mock("GET", format!("/{}/{asset_one_hash}", &asset_one_hash[..2]).as_str())
        .with_body(ASSET_ONE)
        .expect(2)
        .create_async()
        .await;
    let asset_two_mock = server
        .mock("GET", format!("/{}/{asset_two_hash}", &asset_two_hash[..2]).as_str())
        .with_body(ASSET_TWO)
        .expect(1)
        .create_async()
        .await;

    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let operations = Operations::new(bus.clone());

    // Fresh install: everything downloads and verifies.
    let details = ensure_version(VERSION_ID, &operations, &bus).await.unwrap();
    assert_eq!(details.id, VERSION_ID);
    assert_eq!(details.mainClass, "net.minecraft.client.main.Main");

    let client_jar = root.join(format!("versions/{VERSION_ID}/{VERSION_ID}.jar"));
    assert_eq!(tokio::fs::read(&client_jar).await.unwrap(), CLIENT_BYTES);

    let library = root.join("libraries/com/example/demo/1.0/demo-1.0.jar");
    assert_eq!(tokio::fs::read(&library).await.unwrap(), LIBRARY_BYTES);

    // Content addressing: each object's bytes hash to its file name.
    for (hash, bytes) in [(&asset_one_hash, ASSET_ONE), (&asset_two_hash, ASSET_TWO)] {
        let object = tokio::fs::read(asset_object_path(hash)).await.unwrap();
        assert_eq!(object, bytes);
        assert_eq!(&sha1_hex(&object), hash);
    }
    assert!(root.join(format!("versions/{VERSION_ID}/natives")).is_dir());

    // Untouched re-run: zero additional requests for anything.
    ensure_version(VERSION_ID, &operations, &bus).await.unwrap();
    client_mock.assert_async().await;
    library_mock.assert_async().await;
    index_mock.assert_async().await;
    asset_two_mock.assert_async().await;

    // Corrupt one asset; the next run re-downloads exactly that file.
    tokio::fs::write(asset_object_path(&asset_one_hash), b"bit rot")
        .await
        .unwrap();
    ensure_version(VERSION_ID, &operations, &bus).await.unwrap();
    asset_one_mock.assert_async().await;

    let repaired = tokio::fs::read(asset_object_path(&asset_one_hash))
        .await
        .unwrap();
    assert_eq!(repaired, ASSET_ONE);

    // Each run published a completed asset-check operation with the full
    // asset count.
    let completed_checks = events
        .try_iter()
        .filter(|event| match event {
            LauncherEvent::OperationUpdated { operation } => {
                operation.kind == OperationKind::AssetCheck
                    && operation.state == OperationState::Completed
                    && operation.total == 2
            }
            _ => false,
        })
        .count();
    assert_eq!(completed_checks, 3);
}

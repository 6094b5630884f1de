//! End-to-end `.mrpack` install and update against a local HTTP server.
//!
//! A vanilla pack keeps the loader installers out of the picture; the
//! interesting machinery (env filtering, hash-verified mod downloads,
//! overrides, instance materialization, stale-file removal on update)
//! all runs for real.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use sha1::{Digest, Sha1};
use zip::write::SimpleFileOptions;

use ember_core::event::EventBus;
use ember_core::operation::Operations;
use ember_core::Loader;
use ember_instances::Instance;
use ember_modpack::{install_from_path, update_from_path, InstallOptions};

const MC_VERSION: &str = "1.20.4";
const CLIENT_BYTES: &[u8] = b"client jar bytes";
const MOD_BYTES: &[u8] = b"demo mod jar";
const NEW_MOD_BYTES: &[u8] = b"replacement mod jar";

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

/// Plants a minimal vanilla version document (no libraries, empty asset
/// index) so `ensure_version` only needs the client jar and the index.
async fn plant_version_document(server_url: &str) {
    let root = launcher_dir();
    let index_text = r#"{"objects": {}}"#;
    let document = serde_json::json!({
        "assetIndex": {
            "id": "17",
            "sha1": sha1_hex(index_text.as_bytes()),
            "size": index_text.len(),
            "totalSize": 0,
            "url": format!("{server_url}/indexes/17.json"),
        },
        "assets": "17",
        "downloads": {
            "client": {
                "sha1": sha1_hex(CLIENT_BYTES),
                "size": CLIENT_BYTES.len(),
                "url": format!("{server_url}/client.jar"),
            },
            "server": null,
        },
        "id": MC_VERSION,
        "javaVersion": {"component": "java-runtime-gamma", "majorVersion": 17},
        "libraries": [],
        "mainClass": "net.minecraft.client.main.Main",
        "minecraftArguments": null,
        "arguments": null,
        "releaseTime": "2023-12-07T12:00:00+00:00",
        "time": "2023-12-07T12:00:00+00:00",
        "type": "release",
    });
    let path = root.join(format!("versions/{MC_VERSION}/{MC_VERSION}.json"));
    tokio::fs::create_dir_all(path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&path, serde_json::to_vec_pretty(&document).unwrap())
        .await
        .unwrap();
}

fn write_mrpack(
    path: &Path,
    version_id: &str,
    files_json: &str,
    override_files: &[(&str, &[u8])],
) {
    let index = format!(
        r#"{{
            "formatVersion": 1,
            "game": "minecraft",
            "versionId": "{version_id}",
            "name": "Test Pack",
            "summary": "A pack for tests",
            "dependencies": {{"minecraft": "{MC_VERSION}"}},
            "files": {files_json}
        }}"#
    );

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    zip.start_file("modrinth.index.json", options).unwrap();
    zip.write_all(index.as_bytes()).unwrap();
    for (name, contents) in override_files {
        zip.start_file(format!("overrides/{name}"), options).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
}

#[tokio::test]
async fn install_then_update_lifecycle() {
    let root = launcher_dir().to_path_buf();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("EMBER_RESOURCES_URL", server.url());
    plant_version_document(&server.url()).await;

    let client_mock = server
        .mock("GET", "/client.jar")
        .with_body(CLIENT_BYTES)
        .expect(1)
        .create_async()
        .await;
    let index_mock = server
        .mock("GET", "/indexes/17.json")
        .with_body(r#"{"objects": {}}"#)
        .expect(1)
        .create_async()
        .await;
    let mod_mock = server
        .mock("GET", "/demo-mod.jar")
        .with_body(MOD_BYTES)
        .expect(1)
        .create_async()
        .await;
    let new_mod_mock = server
        .mock("GET", "/new-mod.jar")
        .with_body(NEW_MOD_BYTES)
        .expect(1)
        .create_async()
        .await;
    // No mock for the server-only file: a request for it would fail the
    // install, proving the env filter skipped it.

    let scratch = tempfile::tempdir().unwrap();
    let pack_v1 = scratch.path().join("pack-1.0.mrpack");
    let files_v1 = format!(
        r#"[
            {{
                "path": "mods/demo-mod.jar",
                "hashes": {{"sha1": "{mod_hash}"}},
                "downloads": ["{url}/demo-mod.jar"],
                "fileSize": {mod_size},
                "env": {{"client": "required", "server": "required"}}
            }},
            {{
                "path": "mods/server-only.jar",
                "hashes": {{"sha1": "ffffffffffffffffffffffffffffffffffffffff"}},
                "downloads": ["{url}/server-only.jar"],
                "fileSize": 10,
                "env": {{"client": "unsupported", "server": "required"}}
            }}
        ]"#,
        mod_hash = sha1_hex(MOD_BYTES),
        mod_size = MOD_BYTES.len(),
        url = server.url(),
    );
    write_mrpack(
        &pack_v1,
        "1.0.0",
        &files_v1,
        &[("config/demo.cfg", b"speed=fast")],
    );

    let bus = Arc::new(EventBus::new());
    let operations = Operations::new(bus.clone());

    // Fresh install.
    let instance = install_from_path(&pack_v1, &operations, &bus, &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(instance.id, "test-pack");
    assert_eq!(instance.name, "Test Pack");
    assert_eq!(instance.minecraft_version, MC_VERSION);
    assert_eq!(instance.modloader.kind, Loader::Vanilla);
    assert!(!instance.broken);
    assert!(instance.size_bytes > 0);

    let instance_dir: PathBuf = root.join("instances/test-pack");
    assert_eq!(
        tokio::fs::read(instance_dir.join("mods/demo-mod.jar"))
            .await
            .unwrap(),
        MOD_BYTES
    );
    assert!(!instance_dir.join("mods/server-only.jar").exists());
    assert_eq!(
        tokio::fs::read_to_string(instance_dir.join("config/demo.cfg"))
            .await
            .unwrap(),
        "speed=fast"
    );

    // The document written last: a loadable, healthy instance record.
    let loaded = Instance::load("test-pack").await.unwrap();
    assert_eq!(loaded.id, instance.id);

    // Some playtime that the update must not lose.
    Instance::add_playtime("test-pack", 7).await.unwrap();

    // Update to a version that drops the old mod and adds a new one.
    let pack_v2 = scratch.path().join("pack-2.0.mrpack");
    let files_v2 = format!(
        r#"[{{
            "path": "mods/new-mod.jar",
            "hashes": {{"sha1": "{hash}"}},
            "downloads": ["{url}/new-mod.jar"],
            "fileSize": {size},
            "env": {{"client": "required", "server": "required"}}
        }}]"#,
        hash = sha1_hex(NEW_MOD_BYTES),
        size = NEW_MOD_BYTES.len(),
        url = server.url(),
    );
    write_mrpack(
        &pack_v2,
        "2.0.0",
        &files_v2,
        &[("config/demo.cfg", b"speed=faster")],
    );

    let updated = update_from_path("test-pack", &pack_v2, &operations, &bus, &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(updated.id, "test-pack");
    assert_eq!(updated.total_play_time_minutes, 7);
    assert!(!updated.broken);

    // Stale file removed, new file present, overrides reapplied.
    assert!(!instance_dir.join("mods/demo-mod.jar").exists());
    assert_eq!(
        tokio::fs::read(instance_dir.join("mods/new-mod.jar"))
            .await
            .unwrap(),
        NEW_MOD_BYTES
    );
    assert_eq!(
        tokio::fs::read_to_string(instance_dir.join("config/demo.cfg"))
            .await
            .unwrap(),
        "speed=faster"
    );

    // Installing the same pack again gets a disambiguated id. Its mod
    // file lands in a different instance directory, so the demo mod is
    // requested a second time; that mock is not count-asserted.
    let second = install_from_path(&pack_v1, &operations, &bus, &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(second.id, "test-pack-2");

    client_mock.assert_async().await;
    index_mock.assert_async().await;
    new_mod_mock.assert_async().await;
    drop(mod_mock);
}

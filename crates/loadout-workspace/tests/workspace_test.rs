//! End-to-end preparation tests against an isolated base installation,
//! CAS and workspace root.

use std::sync::{Arc, Mutex};

use loadout_cas::{hash_bytes, CasOptions, CasReferenceTracker, CasStorage, GarbageCollector};
use loadout_config::testing::TestEnvironment;
use loadout_config::HashMismatchPolicy;
use loadout_manifest::{
    ContentManifest, ContentSourceType, ContentType, ManifestFile, WorkspaceStrategy,
};
use loadout_workspace::{
    IssueSeverity, IssueType, NoProgress, WorkspaceConfiguration, WorkspaceError,
    WorkspaceManager, WorkspaceProgress,
};
use tokio_util::sync::CancellationToken;

struct Fixture {
    env: TestEnvironment,
    storage: Arc<CasStorage>,
    manager: WorkspaceManager,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(tune: impl FnOnce(&mut loadout_config::Config)) -> Fixture {
    let env = TestEnvironment::new().unwrap();
    let mut config = env.config();
    tune(&mut config);
    let storage = Arc::new(CasStorage::new(&env.cas_root, CasOptions::from(&config.cas)).unwrap());
    let tracker = Arc::new(CasReferenceTracker::new(&env.cas_root));
    let manager = WorkspaceManager::with_defaults(&config, storage.clone(), tracker);
    Fixture {
        env,
        storage,
        manager,
    }
}

impl Fixture {
    fn config(&self, id: &str, strategy: WorkspaceStrategy) -> WorkspaceConfiguration {
        WorkspaceConfiguration::new(
            id,
            strategy,
            &self.env.base_installation,
            &self.env.workspace_root,
        )
    }

    fn tracker(&self) -> CasReferenceTracker {
        CasReferenceTracker::new(&self.env.cas_root)
    }
}

fn game_manifest() -> ContentManifest {
    let mut manifest = ContentManifest::new("generals-1.08", "Generals", "1.08");
    manifest.content_type = ContentType::GameInstallation;
    manifest.files = vec![
        ManifestFile::local("game.exe", 1_000_000).executable(),
        ManifestFile::local("config.ini", 1_000),
        ManifestFile::local("textures/large.tga", 5_000_000),
        ManifestFile::local("sounds/music.wav", 10_000_000),
    ];
    manifest
}

fn seed_game(env: &TestEnvironment) {
    env.create_base_file("game.exe", b"MZ").unwrap();
    env.create_base_file("config.ini", b"[Game]").unwrap();
    env.create_base_file("textures/large.tga", b"TGA").unwrap();
    env.create_base_file("sounds/music.wav", b"RIFF").unwrap();
}

fn recorder() -> (Arc<Mutex<Vec<WorkspaceProgress>>>, impl Fn(WorkspaceProgress) + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |p| sink.lock().unwrap().push(p))
}

#[cfg(unix)]
fn is_symlink(path: &std::path::Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(unix)]
#[tokio::test]
async fn test_hybrid_copies_essential_and_links_media() {
    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("hybrid", WorkspaceStrategy::HybridCopySymlink)
        .with_manifest(game_manifest());

    assert_eq!(fx.manager.estimate_disk_usage(&config).unwrap(), 1_003_048);

    let (seen, reporter) = recorder();
    let info = fx
        .manager
        .prepare_workspace(&config, &reporter, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success, "{:?}", info.validation_issues);
    assert_eq!(info.file_count, 4);
    assert_eq!(info.total_size_bytes, 16_001_000);

    let ws = config.workspace_path();
    assert!(!is_symlink(&ws.join("game.exe")));
    assert!(!is_symlink(&ws.join("config.ini")));
    assert!(is_symlink(&ws.join("textures/large.tga")));
    assert!(is_symlink(&ws.join("sounds/music.wav")));
    assert_eq!(std::fs::read(ws.join("sounds/music.wav")).unwrap(), b"RIFF");
    assert_eq!(info.executable_path, Some(ws.join("game.exe")));

    let seen = seen.lock().unwrap();
    let processed: Vec<_> = seen.iter().map(|p| p.processed).collect();
    assert_eq!(processed, [1, 2, 3, 4]);
    assert_eq!(seen.iter().filter(|p| p.is_complete()).count(), 1);
    assert_eq!(seen[2].operation, "Linking");

    let stored = fx.manager.get_workspace("hybrid").await.unwrap().unwrap();
    assert_eq!(stored.file_count, 4);
}

#[tokio::test]
async fn test_prepare_twice_is_idempotent() {
    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("again", WorkspaceStrategy::FullCopy)
        .with_manifest(game_manifest());
    let cancel = CancellationToken::new();

    let first = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &cancel)
        .await
        .unwrap();
    let second = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &cancel)
        .await
        .unwrap();
    assert!(first.success && second.success);

    let all = fx.manager.get_all_workspaces().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].created_at, first.created_at);

    let entries = std::fs::read_dir(config.workspace_path()).unwrap().count();
    assert_eq!(entries, 4); // game.exe, config.ini, textures/, sounds/
}

#[tokio::test]
async fn test_cancellation_leaves_no_directory() {
    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("cancelled", WorkspaceStrategy::FullCopy)
        .with_manifest(game_manifest());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let reporter = move |p: WorkspaceProgress| {
        if p.processed == 1 {
            trigger.cancel();
        }
    };
    let err = fx
        .manager
        .prepare_workspace(&config, &reporter, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkspaceError::Cancelled));
    assert!(!config.workspace_path().exists());
    assert!(fx.manager.get_all_workspaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let fx = fixture();
    let config = fx.config("early", WorkspaceStrategy::FullCopy);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::Cancelled));
    assert!(!config.workspace_path().exists());
}

#[tokio::test]
async fn test_missing_required_source_fails_without_persisting() {
    let fx = fixture();
    fx.env.create_base_file("game.exe", b"MZ").unwrap();
    let config = fx
        .config("broken", WorkspaceStrategy::SymlinkOnly)
        .with_manifest(game_manifest());

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!info.success);
    let issue = info.validation_issues.last().unwrap();
    assert_eq!(issue.issue_type, IssueType::MissingSource);
    assert_eq!(issue.severity, IssueSeverity::Error);
    assert_eq!(issue.path.as_deref(), Some("config.ini"));
    assert!(!config.workspace_path().exists());
    assert!(fx.manager.get_workspace("broken").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_optional_source_is_a_warning() {
    let fx = fixture();
    seed_game(&fx.env);
    let mut manifest = game_manifest();
    manifest
        .files
        .push(ManifestFile::local("movies/intro.bik", 50_000_000).optional());
    let config = fx
        .config("optional", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest)
        .validate_after_preparation(true);

    let (seen, reporter) = recorder();
    let info = fx
        .manager
        .prepare_workspace(&config, &reporter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(info.success);
    assert_eq!(info.file_count, 4);
    assert!(!info.has_errors());
    let warnings: Vec<_> = info
        .validation_issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].issue_type, IssueType::MissingSource);

    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!((last.processed, last.total), (5, 5));
    assert_eq!(last.operation, "Skipped");
}

#[tokio::test]
async fn test_empty_configuration_reports_once() {
    let fx = fixture();
    let config = fx.config("empty", WorkspaceStrategy::HybridCopySymlink);

    let (seen, reporter) = recorder();
    let info = fx
        .manager
        .prepare_workspace(&config, &reporter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(info.success);
    assert!(config.workspace_path().is_dir());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].processed, seen[0].total), (0, 0));
}

#[tokio::test]
async fn test_invalid_id_is_a_configuration_error() {
    let fx = fixture();
    let config = fx.config("../escape", WorkspaceStrategy::FullCopy);
    let err = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn test_cas_files_are_tracked_until_cleanup() {
    let fx = fixture();
    let hash = hash_bytes(b"[Patch]");
    fx.storage.store_bytes(b"[Patch]", &hash).await.unwrap();

    let mut patch = ContentManifest::new("patch-1.09", "Patch", "1.09");
    patch.content_type = ContentType::Patch;
    patch.files = vec![ManifestFile::cas("Data/INI/Patch.ini", 7, &hash)];
    let config = fx
        .config("patched", WorkspaceStrategy::FullCopy)
        .with_manifest(patch);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);
    assert_eq!(info.referenced_objects, vec![hash.clone()]);

    let copied = config.workspace_path().join("Data/INI/Patch.ini");
    assert_eq!(std::fs::read(&copied).unwrap(), b"[Patch]");
    assert!(!std::fs::metadata(&copied).unwrap().permissions().readonly());
    assert!(fx.tracker().is_referenced(&hash).await.unwrap());

    assert!(fx.manager.cleanup_workspace("patched").await.unwrap());
    assert!(!config.workspace_path().exists());
    assert!(!fx.tracker().is_referenced(&hash).await.unwrap());
    assert!(fx.manager.get_all_workspaces().await.unwrap().is_empty());
    assert!(!fx.manager.cleanup_workspace("patched").await.unwrap());
}

#[tokio::test]
async fn test_missing_cas_object_fails() {
    let fx = fixture();
    let mut patch = ContentManifest::new("patch", "Patch", "1.0");
    patch.files = vec![ManifestFile::cas("a.ini", 1, hash_bytes(b"never stored"))];
    let config = fx
        .config("nocas", WorkspaceStrategy::FullCopy)
        .with_manifest(patch);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!info.success);
    assert_eq!(
        info.validation_issues[0].issue_type,
        IssueType::MissingSource
    );
}

#[tokio::test]
async fn test_later_manifest_overrides_base_file() {
    let fx = fixture();
    fx.env.create_base_file("Data/INI/GameData.ini", b"old").unwrap();
    let hash = hash_bytes(b"new");
    fx.storage.store_bytes(b"new", &hash).await.unwrap();

    let mut base = ContentManifest::new("base", "Base", "1.0");
    base.files = vec![ManifestFile::local("Data/INI/GameData.ini", 3)];
    let mut patch = ContentManifest::new("patch", "Patch", "1.1");
    patch.files = vec![ManifestFile::cas("Data/INI/GameData.ini", 3, &hash)];
    let config = fx
        .config("override", WorkspaceStrategy::FullCopy)
        .with_manifests([base, patch]);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);
    assert_eq!(info.file_count, 1);
    assert_eq!(
        std::fs::read(config.workspace_path().join("Data/INI/GameData.ini")).unwrap(),
        b"new"
    );
    // Base installation untouched.
    assert_eq!(
        std::fs::read(fx.env.base_installation.join("Data/INI/GameData.ini")).unwrap(),
        b"old"
    );
}

#[tokio::test]
async fn test_hash_mismatch_policy() {
    let mut manifest = ContentManifest::new("game", "Game", "1.0");
    let mut file = ManifestFile::local("config.ini", 6);
    file.hash = hash_bytes(b"something else");
    manifest.files = vec![file];

    let warn = fixture();
    warn.env.create_base_file("config.ini", b"[Game]").unwrap();
    let config = warn
        .config("warn", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest.clone());
    let info = warn
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);
    assert_eq!(info.validation_issues[0].issue_type, IssueType::HashMismatch);
    assert_eq!(info.validation_issues[0].severity, IssueSeverity::Warning);

    let fail = fixture_with(|c| c.workspace.hash_mismatch_policy = HashMismatchPolicy::Fail);
    fail.env.create_base_file("config.ini", b"[Game]").unwrap();
    let config = fail
        .config("fail", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest);
    let info = fail
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!info.success);
    assert_eq!(info.validation_issues[0].issue_type, IssueType::HashMismatch);
    assert!(!config.workspace_path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_symlink_links_required_directories() {
    let fx = fixture();
    fx.env.create_base_file("game.exe", b"MZ").unwrap();
    fx.env.create_base_file("Maps/Alpine.map", b"alpine").unwrap();
    fx.env.create_base_file("Maps/Desert.map", b"desert").unwrap();
    fx.env.create_base_dir("Replays").unwrap();

    let mut manifest = ContentManifest::new("maps", "Maps", "1.0");
    manifest.required_directories = vec!["Maps".into(), "Replays".into(), "Screenshots".into()];
    manifest.files = vec![
        ManifestFile::local("game.exe", 2).executable(),
        ManifestFile::local("Maps/Alpine.map", 6),
        ManifestFile::local("Maps/Desert.map", 6),
    ];
    let config = fx
        .config("linked", WorkspaceStrategy::FullSymlink)
        .with_manifest(manifest);

    let (seen, reporter) = recorder();
    let info = fx
        .manager
        .prepare_workspace(&config, &reporter, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success, "{:?}", info.validation_issues);

    let ws = config.workspace_path();
    assert!(is_symlink(&ws.join("Maps")));
    assert!(is_symlink(&ws.join("Replays")));
    assert!(ws.join("Screenshots").is_dir() && !is_symlink(&ws.join("Screenshots")));
    assert!(is_symlink(&ws.join("game.exe")));
    assert_eq!(std::fs::read(ws.join("Maps/Desert.map")).unwrap(), b"desert");

    let labels: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.operation.clone())
        .collect();
    assert_eq!(labels, ["Linking", "Linked via directory", "Linked via directory"]);

    // Cleanup removes the link, not the base installation's maps.
    assert!(fx.manager.cleanup_workspace("linked").await.unwrap());
    assert!(fx.env.base_installation.join("Maps/Alpine.map").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_symlink_keeps_overridden_directory_real() {
    let fx = fixture();
    fx.env.create_base_file("Maps/Alpine.map", b"alpine").unwrap();
    let hash = hash_bytes(b"remastered");
    fx.storage.store_bytes(b"remastered", &hash).await.unwrap();

    let mut manifest = ContentManifest::new("maps", "Maps", "1.0");
    manifest.required_directories = vec!["Maps".into()];
    manifest.files = vec![
        ManifestFile::local("Maps/Alpine.map", 6),
        ManifestFile::cas("Maps/Alpine.map", 10, &hash),
    ];
    let config = fx
        .config("override-link", WorkspaceStrategy::FullSymlink)
        .with_manifest(manifest);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);

    let ws = config.workspace_path();
    assert!(!is_symlink(&ws.join("Maps")));
    assert_eq!(std::fs::read(ws.join("Maps/Alpine.map")).unwrap(), b"remastered");
    assert_eq!(
        std::fs::read(fx.env.base_installation.join("Maps/Alpine.map")).unwrap(),
        b"alpine"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_hard_link_shares_inode_with_base() {
    use std::os::unix::fs::MetadataExt;

    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("hard", WorkspaceStrategy::HardLink)
        .with_manifest(game_manifest());

    assert_eq!(fx.manager.estimate_disk_usage(&config).unwrap(), 4 * 1024);
    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);

    let base = std::fs::metadata(fx.env.base_installation.join("sounds/music.wav")).unwrap();
    let linked = std::fs::metadata(config.workspace_path().join("sounds/music.wav")).unwrap();
    assert_eq!(base.ino(), linked.ino());
}

#[tokio::test]
async fn test_force_recreate_removes_stale_files() {
    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("fresh", WorkspaceStrategy::FullCopy)
        .with_manifest(game_manifest());
    std::fs::create_dir_all(config.workspace_path()).unwrap();
    std::fs::write(config.workspace_path().join("stale.txt"), b"x").unwrap();

    let info = fx
        .manager
        .prepare_workspace(
            &config.clone().force_recreate(true),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(info.success);
    assert!(!config.workspace_path().join("stale.txt").exists());
}

#[tokio::test]
async fn test_failed_reprepare_drops_stale_entry() {
    let fx = fixture();
    seed_game(&fx.env);
    let hash = hash_bytes(b"[Patch]");
    fx.storage.store_bytes(b"[Patch]", &hash).await.unwrap();
    let mut manifest = game_manifest();
    manifest.files.push(ManifestFile::cas("Data/Patch.ini", 7, &hash));
    let config = fx
        .config("ws", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);
    assert!(fx.tracker().is_referenced(&hash).await.unwrap());

    std::fs::remove_file(fx.env.base_installation.join("config.ini")).unwrap();
    let info = fx
        .manager
        .prepare_workspace(
            &config.clone().force_recreate(true),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!info.success);
    assert!(!config.workspace_path().exists());
    assert!(fx.manager.get_all_workspaces().await.unwrap().is_empty());
    let refs = fx.tracker().all_references().await.unwrap();
    assert_eq!(refs.workspace_records, 0);
    assert!(!refs.contains(&hash));
}

#[tokio::test]
async fn test_cancelled_reprepare_drops_stale_entry() {
    let fx = fixture();
    seed_game(&fx.env);
    let config = fx
        .config("ws", WorkspaceStrategy::FullCopy)
        .with_manifest(game_manifest());
    fx.manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fx.manager.get_all_workspaces().await.unwrap().len(), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let reporter = move |_: WorkspaceProgress| trigger.cancel();
    let err = fx
        .manager
        .prepare_workspace(&config.clone().force_recreate(true), &reporter, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkspaceError::Cancelled));
    assert!(fx.manager.get_all_workspaces().await.unwrap().is_empty());
    assert_eq!(fx.tracker().all_references().await.unwrap().workspace_records, 0);
}

#[tokio::test]
async fn test_metadata_failure_releases_references() {
    let fx = fixture();
    std::fs::create_dir_all(fx.env.metadata_path().parent().unwrap()).unwrap();
    std::fs::write(fx.env.metadata_path(), b"not json").unwrap();
    let hash = hash_bytes(b"[Patch]");
    fx.storage.store_bytes(b"[Patch]", &hash).await.unwrap();

    let mut patch = ContentManifest::new("patch", "Patch", "1.0");
    patch.files = vec![ManifestFile::cas("Data/Patch.ini", 7, &hash)];
    let config = fx
        .config("broken-meta", WorkspaceStrategy::FullCopy)
        .with_manifest(patch);

    let err = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkspaceError::Json(_)), "{err:?}");
    assert!(!config.workspace_path().exists());
    assert!(!fx.tracker().is_referenced(&hash).await.unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cas_executables_are_runnable() {
    use std::os::unix::fs::PermissionsExt;

    for strategy in [WorkspaceStrategy::FullCopy, WorkspaceStrategy::SymlinkOnly] {
        let fx = fixture();
        let hash = hash_bytes(b"MZ");
        fx.storage.store_bytes(b"MZ", &hash).await.unwrap();
        let mut manifest = ContentManifest::new("tool", "Tool", "1.0");
        manifest.files = vec![ManifestFile::cas("game.exe", 2, &hash).executable()];
        let config = fx.config("exe", strategy).with_manifest(manifest);

        let info = fx
            .manager
            .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert!(info.success, "{strategy:?}: {:?}", info.validation_issues);

        let exe = config.workspace_path().join("game.exe");
        assert!(!is_symlink(&exe), "{strategy:?}");
        let mode = std::fs::metadata(&exe).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0, "{strategy:?}: mode {mode:o}");
        assert_eq!(std::fs::read(&exe).unwrap(), b"MZ");
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_gc_during_preparation_keeps_objects() {
    let fx = fixture();
    let first = hash_bytes(b"first");
    let second = hash_bytes(b"second");
    fx.storage.store_bytes(b"first", &first).await.unwrap();
    fx.storage.store_bytes(b"second", &second).await.unwrap();

    let mut manifest = ContentManifest::new("mod", "Mod", "1.0");
    manifest.files = vec![
        ManifestFile::cas("a.big", 5, &first),
        ManifestFile::cas("b.big", 6, &second),
    ];
    let config = fx
        .config("racing", WorkspaceStrategy::SymlinkOnly)
        .with_manifest(manifest);

    let gc = GarbageCollector::new(
        fx.storage.clone(),
        Arc::new(fx.tracker()),
        std::time::Duration::ZERO,
    );
    let collected = Arc::new(Mutex::new(None));
    let sink = collected.clone();
    let reporter = move |p: WorkspaceProgress| {
        if p.processed == 1 {
            let stats = tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(gc.collect(true))
            });
            *sink.lock().unwrap() = Some(stats.unwrap());
        }
    };

    let info = fx
        .manager
        .prepare_workspace(&config, &reporter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(info.success, "{:?}", info.validation_issues);
    let stats = collected.lock().unwrap().take().unwrap();
    assert_eq!(stats.deleted, 0);
    assert!(fx.storage.object_exists(&first).await);
    assert!(fx.storage.object_exists(&second).await);
    let ws = config.workspace_path();
    assert_eq!(std::fs::read(ws.join("a.big")).unwrap(), b"first");
    assert_eq!(std::fs::read(ws.join("b.big")).unwrap(), b"second");
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_only_links_cas_and_local_files() {
    let fx = fixture();
    fx.env.create_base_file("Data/English.big", b"english").unwrap();
    let hash = hash_bytes(b"patched");
    fx.storage.store_bytes(b"patched", &hash).await.unwrap();

    let mut manifest = ContentManifest::new("mixed", "Mixed", "1.0");
    manifest.files = vec![
        ManifestFile::local("Data/English.big", 7),
        ManifestFile::cas("Data/Patch.big", 7, &hash),
    ];
    let config = fx
        .config("linked-only", WorkspaceStrategy::SymlinkOnly)
        .with_manifest(manifest);

    assert_eq!(fx.manager.estimate_disk_usage(&config).unwrap(), 2 * 1024);
    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success, "{:?}", info.validation_issues);
    assert_eq!(info.referenced_objects, vec![hash.clone()]);

    let ws = config.workspace_path();
    assert!(is_symlink(&ws.join("Data/English.big")));
    assert!(is_symlink(&ws.join("Data/Patch.big")));
    assert_eq!(std::fs::read(ws.join("Data/English.big")).unwrap(), b"english");
    assert_eq!(std::fs::read(ws.join("Data/Patch.big")).unwrap(), b"patched");
}

#[tokio::test]
async fn test_download_source_is_stored_and_placed() {
    let mut server = mockito::Server::new_async().await;
    let body = b"downloaded patch".to_vec();
    let hash = hash_bytes(&body);
    let mock = server
        .mock("GET", "/patch.big")
        .with_status(200)
        .with_body(body.clone())
        .create_async()
        .await;

    let fx = fixture();
    let mut file = ManifestFile::local("Data/Patch.big", body.len() as u64);
    file.source_type = ContentSourceType::Download;
    file.hash = hash.clone();
    file.download_url = Some(format!("{}/patch.big", server.url()));
    let mut manifest = ContentManifest::new("remote", "Remote", "1.0");
    manifest.files = vec![file];
    let config = fx
        .config("downloaded", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(info.success, "{:?}", info.validation_issues);
    assert_eq!(
        std::fs::read(config.workspace_path().join("Data/Patch.big")).unwrap(),
        body
    );
    assert!(fx.storage.object_exists(&hash).await);
    assert_eq!(info.referenced_objects, vec![hash.clone()]);
    assert!(fx.tracker().is_referenced(&hash).await.unwrap());
}

#[tokio::test]
async fn test_failed_optional_download_is_a_warning() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/missing.big")
        .with_status(404)
        .create_async()
        .await;

    let fx = fixture();
    let mut file = ManifestFile::local("Data/Missing.big", 10).optional();
    file.source_type = ContentSourceType::Download;
    file.download_url = Some(format!("{}/missing.big", server.url()));
    let mut manifest = ContentManifest::new("remote", "Remote", "1.0");
    manifest.files = vec![file];
    let config = fx
        .config("optional-download", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success);
    assert_eq!(info.validation_issues[0].issue_type, IssueType::MissingSource);
    assert_eq!(info.validation_issues[0].severity, IssueSeverity::Warning);
}

#[tokio::test]
async fn test_malformed_optional_cas_hash_is_skipped() {
    let fx = fixture();
    fx.env.create_base_file("config.ini", b"[Game]").unwrap();
    let mut manifest = ContentManifest::new("game", "Game", "1.0");
    manifest.files = vec![
        ManifestFile::local("config.ini", 6),
        ManifestFile::cas("Data/Extra.big", 3, "xyz").optional(),
    ];
    let config = fx
        .config("bad-hash", WorkspaceStrategy::FullCopy)
        .with_manifest(manifest);

    let info = fx
        .manager
        .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.success, "{:?}", info.validation_issues);
    assert_eq!(info.validation_issues.len(), 1);
    assert_eq!(info.validation_issues[0].issue_type, IssueType::MissingSource);
    assert_eq!(info.validation_issues[0].severity, IssueSeverity::Warning);
    assert!(config.workspace_path().join("config.ini").exists());
    assert!(!config.workspace_path().join("Data/Extra.big").exists());
}

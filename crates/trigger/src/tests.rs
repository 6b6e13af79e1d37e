use super::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Default)]
struct RecordingRunner {
    calls: Vec<(PathBuf, Vec<String>, EnvMap, ExecMode)>,
}

impl TriggerRunner for RecordingRunner {
    fn run(&mut self, hook: &Path, args: &[String], env: &EnvMap, mode: ExecMode) -> CeResult<()> {
        self.calls.push((hook.to_path_buf(), args.to_vec(), env.clone(), mode));
        Ok(())
    }
}

fn test_cfg() -> BucketConfig {
    BucketConfig {
        capacity: 10,
        window: Duration::from_secs(60),
        log: false,
        trigger: None,
    }
}

fn crossed_bucket(cfg: &BucketConfig) -> LeakyBucket {
    let mut bucket = LeakyBucket::new();
    for t in 0..10 {
        bucket.account(cfg, 1, t);
    }
    bucket
}

#[test]
fn dispatch_builds_the_documented_environment() {
    let cfg = test_cfg();
    let bucket = crossed_bucket(&cfg);
    let hook = PathBuf::from("/usr/local/bin/notify");
    let mut dispatcher = Dispatcher::new(RecordingRunner::default());

    dispatcher.dispatch(&Notice {
        message: "Corrected memory errors on page 1000 exceed threshold 10 in 1m".into(),
        cfg: &cfg,
        bucket: &bucket,
        total_count: 10,
        last_event: 9,
        dimm: Some(DimmLocation {
            socket_id: 1,
            channel: Some(2),
            dimm: None,
        }),
        hook: Some(&hook),
        args: Vec::new(),
        mode: ExecMode::Async,
    });

    let (path, args, env, mode) = &dispatcher.runner.calls[0];
    assert_eq!(path, &hook);
    assert!(args.is_empty());
    assert_eq!(*mode, ExecMode::Async);
    assert_eq!(env["THRESHOLD"], "10 in 1m");
    assert_eq!(env["TOTALCOUNT"], "10");
    assert_eq!(env["LASTEVENT"], "9");
    assert_eq!(env["AGETIME"], "60");
    assert_eq!(
        env["MESSAGE"],
        "Corrected memory errors on page 1000 exceed threshold 10 in 1m"
    );
    assert_eq!(env["THRESHOLD_COUNT"], "0");
    assert_eq!(env["SOCKETID"], "1");
    assert_eq!(env["CHANNEL"], "2");
    assert_eq!(env["DIMM"], "?");
}

#[test]
fn zero_timestamp_suppresses_lastevent() {
    let cfg = test_cfg();
    let bucket = crossed_bucket(&cfg);
    let hook = PathBuf::from("/bin/true");
    let mut dispatcher = Dispatcher::new(RecordingRunner::default());

    dispatcher.dispatch(&Notice {
        message: "test".into(),
        cfg: &cfg,
        bucket: &bucket,
        total_count: 1,
        last_event: 0,
        dimm: None,
        hook: Some(&hook),
        args: Vec::new(),
        mode: ExecMode::Async,
    });

    let (_, _, env, _) = &dispatcher.runner.calls[0];
    assert!(!env.contains_key("LASTEVENT"));
    assert!(!env.contains_key("SOCKETID"));
}

#[test]
fn no_hook_means_no_run() {
    let cfg = test_cfg();
    let bucket = crossed_bucket(&cfg);
    let mut dispatcher = Dispatcher::new(RecordingRunner::default());

    dispatcher.dispatch(&Notice {
        message: "log only".into(),
        cfg: &cfg,
        bucket: &bucket,
        total_count: 1,
        last_event: 1,
        dimm: None,
        hook: None,
        args: Vec::new(),
        mode: ExecMode::Async,
    });

    assert!(dispatcher.runner.calls.is_empty());
}

#[test]
fn positional_args_are_passed_through() {
    let cfg = test_cfg();
    let bucket = crossed_bucket(&cfg);
    let hook = PathBuf::from("/bin/true");
    let mut dispatcher = Dispatcher::new(RecordingRunner::default());

    dispatcher.dispatch(&Notice {
        message: "pre soft trigger run for page 1000".into(),
        cfg: &cfg,
        bucket: &bucket,
        total_count: 1,
        last_event: 1,
        dimm: None,
        hook: Some(&hook),
        args: vec!["4096".into()],
        mode: ExecMode::Sync,
    });

    let (_, args, _, mode) = &dispatcher.runner.calls[0];
    assert_eq!(args, &["4096".to_string()]);
    assert_eq!(*mode, ExecMode::Sync);
}

#[test]
fn check_hook_accepts_an_executable_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hook.sh");
    fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    assert!(check_hook(&path).is_ok());
}

#[test]
fn check_hook_rejects_missing_and_non_executable_paths() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(check_hook(&missing).is_err());

    let plain = dir.path().join("plain.txt");
    fs::write(&plain, "not a script").unwrap();
    fs::set_permissions(&plain, fs::Permissions::from_mode(0o644)).unwrap();
    let err = check_hook(&plain).unwrap_err();
    assert!(err.to_string().contains("not executable"));
}

#[test]
fn command_runner_passes_env_and_args_to_the_hook() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let hook = dir.path().join("hook.sh");
    fs::write(
        &hook,
        format!("#!/bin/sh\necho \"$THRESHOLD|$1\" > {}\n", out.display()),
    )
    .unwrap();
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

    let mut env = EnvMap::new();
    env.insert("THRESHOLD".into(), "10 in 1m".into());

    let mut runner = CommandRunner::new();
    runner
        .run(&hook, &["4096".into()], &env, ExecMode::Sync)
        .unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), "10 in 1m|4096\n");
}

#[test]
fn command_runner_reports_a_failing_sync_hook() {
    let dir = tempdir().unwrap();
    let hook = dir.path().join("hook.sh");
    fs::write(&hook, "#!/bin/sh\nexit 3\n").unwrap();
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

    let mut runner = CommandRunner::new();
    let err = runner
        .run(&hook, &[], &EnvMap::new(), ExecMode::Sync)
        .unwrap_err();
    assert!(matches!(err, CeError::Trigger(_)));
}

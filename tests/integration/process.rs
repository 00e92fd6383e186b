#![cfg(unix)]

use std::{fs, path::Path, sync::Mutex};

use svcctl::{
    constants::{ELLIPSIS, MAX_LOG_LINE_CHARS},
    error::ServiceError,
    platform::Platform,
    runner::{CommandRunner, ProcessRunner},
};
use tempfile::tempdir;

fn write_script(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), format!("#!/usr/bin/env bash\n{body}\n"))
        .expect("failed to write script");
}

async fn run_collecting(
    spec: &svcctl::runner::CommandSpec,
) -> (Result<(), ServiceError>, Vec<(String, String)>) {
    let lines = Mutex::new(Vec::new());
    let sink = |label: &str, line: &str| {
        lines
            .lock()
            .unwrap()
            .push((label.to_string(), line.to_string()));
    };
    let result = CommandRunner.run(spec, &sink).await;
    (result, lines.into_inner().unwrap())
}

#[tokio::test]
async fn start_script_runs_in_checkout_with_script_env() {
    let temp = tempdir().expect("failed to create tempdir");
    let repo = temp.path();
    write_script(
        repo,
        "start-unix.sh",
        r#"echo "cwd=$(basename "$PWD")"
echo "pause=$PAUSE_SECONDS port=$FAST_FAST_WHISPER_PORT"
echo "server.pid" > server.pid"#,
    );

    let env = vec![
        ("PAUSE_SECONDS".to_string(), "0".to_string()),
        ("FAST_FAST_WHISPER_PORT".to_string(), "9911".to_string()),
    ];
    let spec = Platform::Unix.start_command(repo, &env);
    let (result, lines) = run_collecting(&spec).await;

    result.expect("start script should succeed");
    let expected_cwd = format!(
        "cwd={}",
        repo.file_name().unwrap().to_string_lossy()
    );
    assert_eq!(
        lines,
        vec![
            ("start".to_string(), expected_cwd),
            ("start".to_string(), "pause=0 port=9911".to_string()),
        ]
    );
    assert!(repo.join("server.pid").exists());
}

#[tokio::test]
async fn failing_stop_script_reports_command_args_and_code() {
    let temp = tempdir().expect("failed to create tempdir");
    write_script(temp.path(), "stop-unix.sh", "echo 'nothing to stop' >&2\nexit 7");

    let spec = Platform::Unix.stop_command(temp.path(), &[]);
    let (result, lines) = run_collecting(&spec).await;

    let err = result.expect_err("stop script should fail");
    assert_eq!(
        err.to_string(),
        "Command `bash stop-unix.sh` exited with exit code 7"
    );
    assert_eq!(lines, vec![("stop".to_string(), "nothing to stop".to_string())]);
}

#[tokio::test]
async fn output_is_normalized_before_reaching_the_sink() {
    let temp = tempdir().expect("failed to create tempdir");
    write_script(
        temp.path(),
        "start-unix.sh",
        r#"printf 'windows line\r\n'
printf '   spaced     out\t\tline  \n'
printf '\n\n'
printf 'progress 10%%\rprogress 100%%\n'
head -c 500 /dev/zero | tr '\0' 'a'
echo"#,
    );

    let spec = Platform::Unix.start_command(temp.path(), &[]);
    let (result, lines) = run_collecting(&spec).await;
    result.expect("script should succeed");

    let texts: Vec<_> = lines.into_iter().map(|(_, line)| line).collect();
    assert_eq!(texts[0], "windows line");
    assert_eq!(texts[1], "spaced out line");
    assert_eq!(texts[2], "progress 10%");
    assert_eq!(texts[3], "progress 100%");
    assert_eq!(texts.len(), 5);

    let long = &texts[4];
    assert_eq!(long.chars().count(), MAX_LOG_LINE_CHARS);
    assert!(long.ends_with(ELLIPSIS));
}

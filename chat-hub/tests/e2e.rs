use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

type Output = Lines<BufReader<ChildStdout>>;

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_hub");

    let (mut server, mut server_out) = start(
        binary,
        &["server", "--listen", "127.0.0.1:0", "--queue-capacity", "16"],
        Stdio::null(),
    )?;
    let banner = next_line(&mut server_out, "server banner").await?;
    let addr = banner
        .split_whitespace()
        .last()
        .filter(|token| token.contains(':'))
        .ok_or_else(|| anyhow!("no socket address in banner: {banner}"))?
        .to_string();

    // Keep the server's log pipe from filling up.
    let server_logs = tokio::spawn(async move { while let Ok(Some(_)) = server_out.next_line().await {} });

    let mut alice = Participant::join(binary, "alice", &addr).await?;
    let mut bob = Participant::join(binary, "bob", &addr).await?;

    alice.say("Hello from Alice").await?;
    assert_eq!(bob.hear().await?, "<alice> Hello from Alice");

    // Nothing comes back to Alice for her own line; Bob's reply is next.
    bob.say("Hi Alice!").await?;
    assert_eq!(alice.hear().await?, "<bob> Hi Alice!");

    for participant in [&mut alice, &mut bob] {
        participant.say("/quit").await?;
        assert_eq!(participant.hear().await?, "*** leaving chat");
        let status = participant.child.wait().await?;
        ensure!(status.success(), "{} exited with {status}", participant.nickname);
    }

    let _ = server.kill().await;
    let _ = server_logs.await;
    Ok(())
}

struct Participant {
    nickname: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Output,
}

impl Participant {
    async fn join(binary: &Path, nickname: &str, addr: &str) -> Result<Self> {
        let (mut child, stdout) = start(
            binary,
            &["client", "--nickname", nickname, "--server", addr],
            Stdio::piped(),
        )?;
        let stdin = child.stdin.take().context("client stdin missing")?;
        let mut participant = Self {
            nickname: nickname.to_string(),
            child,
            stdin,
            stdout,
        };

        let welcome = participant.hear().await?;
        ensure!(
            welcome == format!("*** connected as {nickname}"),
            "unexpected welcome for {nickname}: {welcome}"
        );
        Ok(participant)
    }

    async fn say(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .with_context(|| format!("{} failed to send '{line}'", self.nickname))?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn hear(&mut self) -> Result<String> {
        next_line(&mut self.stdout, &self.nickname).await
    }
}

fn start(binary: &Path, args: &[&str], stdin: Stdio) -> Result<(Child, Output)> {
    let mut child = Command::new(binary)
        .args(args)
        .env("RUST_LOG", if args[0] == "server" { "info" } else { "warn" })
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", args[0]))?;
    let stdout = child.stdout.take().context("stdout missing after spawn")?;
    Ok((child, BufReader::new(stdout).lines()))
}

async fn next_line(output: &mut Output, who: &str) -> Result<String> {
    timeout(READ_TIMEOUT, output.next_line())
        .await
        .with_context(|| format!("timed out waiting on {who}"))??
        .with_context(|| format!("{who} closed its output"))
}

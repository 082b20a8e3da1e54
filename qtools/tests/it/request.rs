use super::helper::{self, Buffer, Echo};
use anyhow::Result;
use qtools::config::RequestConfig;
use qtools::request::{self, Summary};
use std::io::{self, Write};
use std::time::Duration;

fn config(broker: &str, address: &str, messages: &[&str]) -> RequestConfig {
    RequestConfig {
        targets: vec![format!("//{}/{}", broker, address).parse().unwrap()],
        messages: messages.iter().map(|m| m.to_string()).collect(),
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    }
}

/// Start an echo responder on the address.
async fn echo(broker: &str, address: &str) -> Result<qtools_engine::Injector<()>> {
    let (echo, opened) = Echo::new(broker, address);
    let (stop, _) = helper::spawn(echo);

    helper::within(opened).await??;

    Ok(stop)
}

#[tokio::test]
async fn echo_request() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo").await?;

    let output = Buffer::default();
    let summary = request::run_with_output(config(&broker, "echo", &["ping"]), Box::new(output.clone())).await?;

    assert_eq!(summary, Summary { sent: 1, received: 1 });
    assert_eq!(output.lines(), vec!["ping"]);

    Ok(())
}

#[tokio::test]
async fn requests_over_multiple_targets() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-multi").await?;

    let bodies = ["r1", "r2", "r3", "r4", "r5"];
    let mut config = config(&broker, "echo-multi", &bodies);
    config
        .targets
        .push(format!("amqp://{}/echo-multi", broker).parse()?);

    let output = Buffer::default();
    let summary = request::run_with_output(config, Box::new(output.clone())).await?;

    assert_eq!(summary, Summary { sent: 5, received: 5 });

    let mut lines = output.lines();
    lines.sort();

    assert_eq!(lines, bodies);

    Ok(())
}

#[tokio::test]
async fn json_output() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-json").await?;

    let mut config = config(&broker, "echo-json", &["ping"]);
    config.json = true;

    let output = Buffer::default();
    request::run_with_output(config, Box::new(output.clone())).await?;

    let lines = output.lines();
    assert_eq!(lines.len(), 1);

    let value: serde_json::Value = serde_json::from_str(&lines[0])?;
    assert_eq!(value["body"], "ping");
    assert!(value["address"].is_string());

    Ok(())
}

#[tokio::test]
async fn presettled_requests() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-settled").await?;

    let mut config = config(&broker, "echo-settled", &["one", "two"]);
    config.presettled = true;

    let output = Buffer::default();
    let summary = request::run_with_output(config, Box::new(output.clone())).await?;

    assert_eq!(summary, Summary { sent: 2, received: 2 });

    Ok(())
}

#[tokio::test]
async fn requests_from_input_file() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-file").await?;

    let path = std::env::temp_dir().join(format!("qrequest-{}.txt", uuid::Uuid::new_v4()));
    std::fs::write(&path, "first\nsecond\n")?;

    let mut config = config(&broker, "echo-file", &[]);
    config.input = Some(path.clone());

    let output = Buffer::default();
    let summary = request::run_with_output(config, Box::new(output.clone())).await;

    std::fs::remove_file(&path)?;

    assert_eq!(summary?, Summary { sent: 2, received: 2 });

    let mut lines = output.lines();
    lines.sort();

    assert_eq!(lines, vec!["first", "second"]);

    Ok(())
}

#[tokio::test]
async fn no_broker_is_an_error() -> Result<()> {
    let address = format!("127.0.0.1:{}", helper::free_port()?);

    let result = request::run_with_output(config(&address, "echo", &["ping"]), Box::new(Buffer::default())).await;

    assert!(result.is_err());

    Ok(())
}

#[tokio::test]
async fn no_response_times_out() -> Result<()> {
    let broker = helper::start_broker().await?;

    let mut config = config(&broker, "nobody-home", &["ping"]);
    config.timeout = Some(Duration::from_millis(500));

    let result = request::run_with_output(config, Box::new(Buffer::default())).await;

    assert!(result.is_err());

    Ok(())
}

/// Output whose every write fails, like a closed pipe.
struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

#[tokio::test]
async fn broken_output_fails_the_run() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-broken").await?;

    let mut config = config(&broker, "echo-broken", &["ping"]);
    config.timeout = None;

    let result = helper::within(request::run_with_output(config, Box::new(BrokenPipe))).await?;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Cannot write the response"), "{}", err);

    Ok(())
}

/// Output which takes the responses but cannot flush them.
#[derive(Clone, Default)]
struct Unflushable(Buffer);

impl Write for Unflushable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

#[tokio::test]
async fn failing_flush_fails_the_run() -> Result<()> {
    let broker = helper::start_broker().await?;
    let _echo = echo(&broker, "echo-unflushable").await?;

    let output = Unflushable::default();
    let config = config(&broker, "echo-unflushable", &["ping"]);

    let result = helper::within(request::run_with_output(config, Box::new(output.clone()))).await?;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Cannot flush the output"), "{}", err);
    assert_eq!(output.0.lines(), vec!["ping"]);

    Ok(())
}

//! The request client: sends requests to queues of a broker and collects the responses coming
//! back to a dynamic reply address.
mod dispatcher;
mod input;
mod output;
mod target;
mod tracker;

pub use dispatcher::{Dispatch, Dispatcher, Pending, Transport};
pub use output::Output;
pub use target::Target;
pub use tracker::Tracker;

use crate::config::RequestConfig;
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use qtools_engine::{ConnectionId, Container, Delivery, Handler, LinkId, Message};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Counts of a finished exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summary {
    pub sent: u64,
    pub received: u64,
}

pub struct RequestHandler {
    targets: Vec<Target>,
    dispatcher: Dispatcher,
    output: Output,
    /// Links of the dispatcher not attached by the peer yet.
    opening: HashSet<LinkId>,
    closed: bool,
    failure: Option<String>,
}

impl RequestHandler {
    pub fn new(targets: Vec<Target>, presettled: bool, output: Output) -> Self {
        RequestHandler {
            targets,
            dispatcher: Dispatcher::new(presettled),
            output,
            opening: HashSet::new(),
            closed: false,
            failure: None,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Queue requests before the run.
    pub fn push(&mut self, item: Pending) {
        self.dispatcher.push(item);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            sent: self.dispatcher.tracker().sent_requests(),
            received: self.dispatcher.tracker().received_responses(),
        }
    }

    fn pump(&mut self, container: &mut Container<Pending>, link: Option<LinkId>) -> Result<()> {
        if let Dispatch::Complete = self.dispatcher.pump(container, link)? {
            self.close(container);
        }

        Ok(())
    }

    /// Flush the output and stop the container. A failing flush fails the run.
    fn close(&mut self, container: &mut Container<Pending>) {
        if self.closed {
            return;
        }

        self.closed = true;

        if let Err(err) = self.output.flush() {
            error!("Cannot flush the output: {}", err);

            self.failure = Some(format!("Cannot flush the output: {}", err));
        }

        container.stop();

        let summary = self.summary();

        info!(
            "Sent {} {} and received {} {}",
            summary.sent,
            plural(summary.sent, "request"),
            summary.received,
            plural(summary.received, "response")
        );
    }

    fn fail(&mut self, container: &mut Container<Pending>, reason: String) {
        if self.closed {
            return;
        }

        error!("{}", reason);

        self.failure = Some(reason);
        self.closed = true;

        container.stop();
    }
}

fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        noun.to_string()
    } else {
        format!("{}s", noun)
    }
}

impl Handler for RequestHandler {
    type Input = Pending;

    fn on_start(&mut self, container: &mut Container<Pending>) -> Result<()> {
        for target in &self.targets {
            let connection = container.connect(&target.authority());
            let (sender, receiver) = self.dispatcher.open_links(container, connection, &target.address)?;

            self.opening.insert(sender);
            self.opening.insert(receiver);

            debug!("Connecting to {}", target);
        }

        Ok(())
    }

    fn on_link_opened(&mut self, container: &mut Container<Pending>, link: LinkId) -> Result<()> {
        if !self.opening.remove(&link) || !self.opening.is_empty() {
            return Ok(());
        }

        debug!("Links are open, sending requests");

        self.dispatcher.set_ready();
        self.pump(container, None)
    }

    fn on_link_closing(&mut self, container: &mut Container<Pending>, link: LinkId) -> Result<()> {
        self.fail(container, format!("Link {} was closed by the peer", link));

        Ok(())
    }

    fn on_connection_closing(&mut self, container: &mut Container<Pending>, connection: ConnectionId) -> Result<()> {
        self.fail(container, format!("Connection {} was closed by the peer", connection));

        Ok(())
    }

    fn on_disconnected(&mut self, container: &mut Container<Pending>, connection: ConnectionId) -> Result<()> {
        self.fail(container, format!("Disconnected from {}", connection));

        Ok(())
    }

    fn on_sendable(&mut self, container: &mut Container<Pending>, link: LinkId) -> Result<()> {
        self.pump(container, Some(link))
    }

    fn on_input(&mut self, container: &mut Container<Pending>, input: Pending) -> Result<()> {
        self.dispatcher.push(input);
        self.pump(container, None)
    }

    fn on_message(
        &mut self,
        container: &mut Container<Pending>,
        delivery: &mut Delivery,
        message: Message,
    ) -> Result<()> {
        if self.closed {
            warn!("Response {:?} arrived after closing, ignored", message);

            return Ok(());
        }

        let complete = self.dispatcher.tracker_mut().on_response();

        debug!("Received response {:?} on {}", message, delivery);

        if let Err(err) = self.output.write(&message) {
            self.fail(container, format!("Cannot write the response: {}", err));
        } else if complete {
            self.close(container);
        }

        Ok(())
    }

    fn on_settled(&mut self, _container: &mut Container<Pending>, delivery: &Delivery) -> Result<()> {
        match delivery.remote_state {
            Some(state) => debug!("Request {} is {}", delivery, state),
            None => debug!("Request {} is settled", delivery),
        }

        Ok(())
    }
}

/// Run the client writing the responses to the configured output.
pub async fn run(config: RequestConfig) -> Result<Summary> {
    let writer: Box<dyn Write + Send> = match &config.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Cannot create output {:?}", path))?,
        )),
        None => Box::new(io::stdout()),
    };

    run_with_output(config, writer).await
}

/// Run the client writing the responses to `writer`.
pub async fn run_with_output(config: RequestConfig, writer: Box<dyn Write + Send>) -> Result<Summary> {
    if config.targets.is_empty() {
        return Err(anyhow!("No target is given"));
    }

    let container = Container::with_random_id();
    let mut handler = RequestHandler::new(config.targets, config.presettled, Output::new(writer, config.json));

    if config.messages.is_empty() {
        input::spawn(config.input.as_deref(), container.injector())?;
    } else {
        for body in &config.messages {
            handler.push(Pending::Request(Message::text(body)));
        }

        handler.push(Pending::End);
    }

    let handler = match config.timeout {
        Some(timeout) => tokio::time::timeout(timeout, container.run(handler))
            .await
            .map_err(|_| anyhow!("No answer in {:?}", timeout))??,
        None => container.run(handler).await?,
    };

    match handler.failure {
        Some(reason) => Err(anyhow!(reason)),
        None => Ok(handler.summary()),
    }
}

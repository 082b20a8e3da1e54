use crate::request::dispatcher::Pending;
use anyhow::{Context, Result};
use log::{debug, error};
use qtools_engine::{Injector, Message};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread::{self, JoinHandle};

/// Read the requests on a separate thread from the file or from the standard input, one per
/// line, and inject them into the container. The end of the input is injected as [`Pending::End`].
pub(crate) fn spawn(path: Option<&Path>, injector: Injector<Pending>) -> Result<JoinHandle<()>> {
    let reader: Box<dyn BufRead + Send> = match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Cannot open input {:?}", path))?;

            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };

    let handle = thread::Builder::new()
        .name("input".to_string())
        .spawn(move || read_lines(reader, |item| injector.inject(item).is_ok()))?;

    Ok(handle)
}

/// Push every line as a request and then the end marker. Stops early if `push` returns false.
pub(crate) fn read_lines<R: BufRead>(reader: R, mut push: impl FnMut(Pending) -> bool) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if !push(Pending::Request(Message::text(&line))) {
                    debug!("Input is not consumed anymore");
                    return;
                }
            }
            Err(e) => {
                error!("Error reading input {:?}", e);
                break;
            }
        }
    }

    push(Pending::End);
}

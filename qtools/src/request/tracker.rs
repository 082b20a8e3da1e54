/// Counts the requests sent and the responses received, and tells when the exchange is over.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tracker {
    sent_requests: u64,
    received_responses: u64,
    stop_requested: bool,
}

impl Tracker {
    pub fn sent_requests(&self) -> u64 {
        self.sent_requests
    }

    pub fn received_responses(&self) -> u64 {
        self.received_responses
    }

    /// The end of the input has been reached.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub(crate) fn on_request_sent(&mut self) {
        self.sent_requests += 1;
    }

    pub(crate) fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Count a response. Returns true if it was the last one expected.
    pub fn on_response(&mut self) -> bool {
        self.received_responses += 1;

        self.is_complete()
    }

    /// Every response is received.
    pub fn is_settled(&self) -> bool {
        self.sent_requests == self.received_responses
    }

    /// The input is exhausted and every response is received.
    pub fn is_complete(&self) -> bool {
        self.stop_requested && self.is_settled()
    }
}

//! Candidate WebSocket addresses for the assistant service.

/// Builds `<scheme>://<host>:<port>/<service-path>/<client-id>`.
pub fn endpoint_url(scheme: &str, host: &str, port: u16, service_path: &str, client_id: &str) -> String {
    let path = service_path.trim_matches('/');
    if path.is_empty() {
        format!("{}://{}:{}/{}", scheme, host, port, client_id)
    } else {
        format!("{}://{}:{}/{}/{}", scheme, host, port, path, client_id)
    }
}

/// Ordered list of candidate addresses with one selected as primary.
///
/// Exactly one candidate is used per connect attempt; switching to an
/// alternate is an explicit user choice, never an automatic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolver {
    candidates: Vec<String>,
    selected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint index {index} out of range ({len} candidates)")]
    OutOfRange { index: usize, len: usize },
}

impl EndpointResolver {
    /// An out-of-range `selected` falls back to the first candidate.
    pub fn new(candidates: Vec<String>, selected: usize) -> Self {
        let selected = if selected < candidates.len() { selected } else { 0 };
        Self { candidates, selected }
    }

    pub fn single(url: impl Into<String>) -> Self {
        Self::new(vec![url.into()], 0)
    }

    /// The address the next connect attempt will use.
    pub fn primary(&self) -> Option<&str> {
        self.candidates.get(self.selected).map(String::as_str)
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn select(&mut self, index: usize) -> Result<&str, EndpointError> {
        match self.candidates.get(index) {
            Some(url) => {
                self.selected = index;
                Ok(url.as_str())
            }
            None => Err(EndpointError::OutOfRange {
                index,
                len: self.candidates.len(),
            }),
        }
    }
}

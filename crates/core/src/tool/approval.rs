use std::fmt::{self, Debug, Display};

/// A pending confirmation for one tool call.
///
/// Dropping the approval without deciding counts as a decline.
pub struct ToolApproval {
    call_id: String,
    name: String,
    arguments: String,
    pub(crate) on_result: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl ToolApproval {
    /// Creates a new approval.
    #[inline]
    pub fn new<S1, S2, S3>(call_id: S1, name: S2, arguments: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            on_result: None,
        }
    }

    /// Returns the id of the tool call.
    #[inline]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Returns the name of the tool to be called.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw JSON arguments of the call.
    #[inline]
    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    /// Approves the request.
    #[inline]
    pub fn approve(self) {
        self.resolve(true);
    }

    /// Declines the request.
    #[inline]
    pub fn decline(self) {
        self.resolve(false);
    }

    fn resolve(mut self, approved: bool) {
        let Some(on_result) = self.on_result.take() else {
            return;
        };
        (on_result)(approved);
    }
}

impl Debug for ToolApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolApproval")
            .field("call_id", &self.call_id)
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl Display for ToolApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

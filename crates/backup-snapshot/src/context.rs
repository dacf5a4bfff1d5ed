use core::fmt::Display;

/// Holds the context for the current snapshot run. Used for prefixing logs.
#[derive(Default, Debug)]
pub struct Context {
    /// The name of the snapshot being produced.
    pub snapshot: Option<String>,
    /// The current stage.
    pub current_context: &'static str,
}

impl Context {
    /// Context for a run producing the named snapshot.
    pub fn for_snapshot(name: &str) -> Self {
        Self {
            snapshot: Some(name.to_string()),
            current_context: "Snapshot",
        }
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(snapshot) = &self.snapshot {
            write!(f, "[{snapshot}] ")?;
        }

        if !self.current_context.is_empty() {
            write!(f, "[{}] ", self.current_context)?;
        }

        Ok(())
    }
}

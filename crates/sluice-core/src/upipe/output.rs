//! Output plumbing shared by pipes that forward records.
//!
//! Keeps the designated output pipe and the stored flow definition
//! together, and guarantees the flow definition is delivered in-band
//! before the first data record — consumers learn what they are about to
//! receive from the control record itself.

use crate::upipe::UpipeRef;
use crate::upump::PumpCtl;
use crate::uref::Uref;

/// Output state of one (sub-)pipe.
#[derive(Default)]
pub struct OutputHelper {
    output: Option<UpipeRef>,
    flow_def: Option<Uref>,
    flow_def_sent: bool,
}

impl OutputHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Designates (or clears) the output pipe. The flow definition is
    /// re-sent to a new output.
    pub fn set_output(&mut self, output: Option<UpipeRef>) {
        self.output = output;
        self.flow_def_sent = false;
    }

    pub fn output(&self) -> Option<&UpipeRef> {
        self.output.as_ref()
    }

    /// Stores the flow definition describing subsequent records.
    pub fn store_flow_def(&mut self, flow_def: Option<Uref>) {
        self.flow_def = flow_def;
        self.flow_def_sent = false;
    }

    pub fn flow_def(&self) -> Option<&Uref> {
        self.flow_def.as_ref()
    }

    /// Claims what a delivery needs: the output handle and, on the first
    /// delivery, a duplicate of the flow definition to send ahead of the
    /// record. Lets callers that keep this helper behind a lock deliver
    /// with the lock released.
    pub fn prepare(&mut self) -> Option<(UpipeRef, Option<Uref>)> {
        let output = self.output.clone()?;
        let flow_def = if self.flow_def_sent {
            None
        } else {
            self.flow_def_sent = true;
            self.flow_def.as_ref().map(Uref::dup)
        };
        Some((output, flow_def))
    }

    /// Forwards a record to the output, preceded by the flow definition
    /// when it has not been delivered yet. Records without a designated
    /// output are dropped with a log line.
    pub fn send(&mut self, uref: Uref, pump: Option<&PumpCtl>) {
        let Some((output, flow_def)) = self.prepare() else {
            log::warn!("no output designated, record dropped");
            return;
        };
        if let Some(flow_def) = flow_def {
            output.input(flow_def, pump);
        }
        output.input(uref, pump);
    }
}

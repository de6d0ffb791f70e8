// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared operation context used by both the background cleanup paths and
//! request handling

use slog::Logger;

/// Provided to every operation that touches durable storage
///
/// `OpContext` carries the logger for the operation plus a label describing
/// what kind of caller is running it.  Cancellation does not need explicit
/// plumbing here: every storage-facing call is `async` and dropping the
/// future abandons the operation.
#[derive(Clone)]
pub struct OpContext {
    pub log: Logger,
    kind: OpKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpKind {
    /// Handling an external API request
    ExternalApiRequest,
    /// Background operation (cleanup agents, resyncs)
    Background,
    /// Automated testing
    Test,
}

impl OpContext {
    pub fn for_external_api(log: Logger) -> OpContext {
        OpContext { log, kind: OpKind::ExternalApiRequest }
    }

    pub fn for_background(log: Logger) -> OpContext {
        OpContext { log, kind: OpKind::Background }
    }

    pub fn for_tests(log: Logger) -> OpContext {
        OpContext { log, kind: OpKind::Test }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Returns a new context with `label` attached to log messages
    pub fn child(&self, label: &'static str) -> OpContext {
        OpContext {
            log: self.log.new(slog::o!("component" => label)),
            kind: self.kind,
        }
    }
}

#[cfg(test)]
mod test {
    use super::OpContext;
    use super::OpKind;

    #[test]
    fn test_kinds_survive_child() {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let external = OpContext::for_external_api(log.clone());
        assert_eq!(external.kind(), OpKind::ExternalApiRequest);
        assert_eq!(external.child("authz").kind(), OpKind::ExternalApiRequest);
        assert_eq!(
            OpContext::for_background(log.clone()).kind(),
            OpKind::Background
        );
        assert_eq!(OpContext::for_tests(log).kind(), OpKind::Test);
    }
}

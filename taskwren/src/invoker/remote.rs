// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use log::debug;

use crate::error::InvokerError;
use crate::invoker::{Acknowledgment, Invoker};
use crate::payload::{InvocationConfig, InvokerKind, Payload};
use crate::remote_client::RemoteFunctionClient;

pub const FUNCTION_IDENTITY: &str = "function_identity";
pub const REGION_IDENTITY: &str = "region_identity";

/// Fire-and-forget dispatch to a function on a remote compute service.
///
/// Every `invoke` issues exactly one event invocation and returns as soon as
/// the service acknowledged it. Nothing is retried, and results are not collected here.
pub struct RemoteFunctionInvoker {
    function: String,
    region: String,
    client: Box<dyn RemoteFunctionClient>,
    config: InvocationConfig,
}

impl RemoteFunctionInvoker {
    pub fn new(
        region: impl Into<String>,
        function: impl Into<String>,
        client: Box<dyn RemoteFunctionClient>,
    ) -> Self {
        let region = region.into();
        let function = function.into();
        let config: InvocationConfig = [
            (FUNCTION_IDENTITY, function.clone()),
            (REGION_IDENTITY, region.clone()),
        ]
        .into_iter()
        .collect();
        Self {
            function,
            region,
            client,
            config,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl Invoker for RemoteFunctionInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::Remote
    }

    fn invoke(&mut self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        let body = payload.to_json_vec()?;
        let ack = self
            .client
            .invoke_async(&self.function, &self.region, &body)
            .map_err(|source| InvokerError::Transport {
                function: self.function.clone(),
                region: self.region.clone(),
                source,
            })?;

        if !ack.is_accepted() {
            let reason = match &ack.function_error {
                Some(function_error) => format!("function error {function_error}"),
                None => "the service did not queue the invocation".to_string(),
            };
            return Err(InvokerError::InvocationRejected {
                function: self.function.clone(),
                status: ack.status_code,
                reason,
            });
        }

        debug!(
            "invoked {} in {} (request {})",
            self.function,
            self.region,
            ack.request_id.as_deref().unwrap_or("-")
        );
        Ok(Acknowledgment::Dispatched {
            request_id: ack.request_id,
        })
    }

    fn config(&self) -> &InvocationConfig {
        &self.config
    }

    fn time_limit(&self) -> bool {
        true
    }
}

//! Provider double whose behaviour is chosen by a scenario step.

use async_trait::async_trait;
use simqueue::queue::{
    domain::LabelField,
    ports::{
        ProviderAction, ProviderClient, ProviderError, ProviderOutcome, ProviderResult, SimPage,
        SimQuery,
    },
};

const TIMEOUT: &str = "dial tcp 10.0.0.1:443: i/o timeout";

/// How the scripted provider answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Every write succeeds.
    Accept,
    /// Every write times out.
    Timeout,
    /// Label writes are refused for lack of permission.
    DenyLabels,
}

/// Provider double that answers according to a fixed [`ProviderMode`].
#[derive(Debug, Clone, Copy)]
pub struct ScriptedProvider {
    mode: ProviderMode,
}

impl ScriptedProvider {
    /// Creates a provider answering in `mode`.
    #[must_use]
    pub const fn new(mode: ProviderMode) -> Self {
        Self { mode }
    }

    fn write(self, request_id: i64) -> ProviderResult<ProviderOutcome> {
        if self.mode == ProviderMode::Timeout {
            return Err(ProviderError::from_message(TIMEOUT));
        }
        Ok(ProviderOutcome {
            result: "succeeded".to_owned(),
            message: "OK".to_owned(),
            request_id: Some(request_id),
        })
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn login(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn get_sims(&self, _query: &SimQuery) -> ProviderResult<SimPage> {
        Ok(SimPage::default())
    }

    async fn bulk_update(
        &self,
        _targets: &[String],
        _action: ProviderAction,
        _value: &str,
    ) -> ProviderResult<ProviderOutcome> {
        self.write(101)
    }

    async fn update_sim_label(
        &self,
        _target: &str,
        _field: LabelField,
        _value: &str,
    ) -> ProviderResult<ProviderOutcome> {
        if self.mode == ProviderMode::DenyLabels {
            return Ok(ProviderOutcome {
                result: "FAILED".to_owned(),
                message: "Permission Denied".to_owned(),
                request_id: None,
            });
        }
        self.write(202)
    }

    async fn get_sim_status(&self, _target: &str) -> ProviderResult<Option<String>> {
        Ok(Some("Activated".to_owned()))
    }
}

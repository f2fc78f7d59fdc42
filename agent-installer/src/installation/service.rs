// Service control helpers
//
// Start/stop requests return immediately; these helpers poll status until the target state is
// reached, sleeping a tenth of the service's wait hint (clamped) between polls, and give up once
// the policy's timeout elapses.

use log::{debug, info, warn};
use std::time::Instant;
use tokio::time::{sleep, timeout};

use crate::capability::{CapabilityError, CapabilityProvider, ServiceState};
use crate::config::ServiceWaitPolicy;
use crate::error::{InstallError, InstallStep};

async fn poll_until(
    provider: &dyn CapabilityProvider,
    service_name: &str,
    target: ServiceState,
    policy: &ServiceWaitPolicy,
    step: InstallStep,
) -> Result<(), InstallError> {
    loop {
        let status = provider
            .query_service_status(service_name)
            .await
            .map_err(InstallError::capability(step))?;
        if status.state == target {
            return Ok(());
        }
        let interval = policy.poll_interval(status.wait_hint);
        debug!(
            "[PHASE: service] [STEP: {}] {} is {:?}; waiting {}ms for {:?}",
            step,
            service_name,
            status.state,
            interval.as_millis(),
            target
        );
        sleep(interval).await;
    }
}

async fn wait_for_state(
    provider: &dyn CapabilityProvider,
    service_name: &str,
    target: ServiceState,
    policy: &ServiceWaitPolicy,
    step: InstallStep,
) -> Result<(), InstallError> {
    let limit = match step {
        InstallStep::StopService => policy.stop_timeout(),
        _ => policy.start_timeout(),
    };
    match timeout(limit, poll_until(provider, service_name, target, policy, step)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "[PHASE: service] [STEP: {}] {} did not reach {:?} within {}ms",
                step,
                service_name,
                target,
                limit.as_millis()
            );
            Err(InstallError::Timeout {
                operation: format!("{} {}", step, service_name),
                timeout_ms: limit.as_millis(),
            })
        }
    }
}

/// Stop `service_name` and wait until it reports `Stopped`. A missing service counts as stopped.
pub async fn stop_service_and_wait(
    provider: &dyn CapabilityProvider,
    service_name: &str,
    policy: &ServiceWaitPolicy,
) -> Result<(), InstallError> {
    let started = Instant::now();
    debug!(
        "[PHASE: service] [STEP: stop_service] stop_service_and_wait entered (service_name={})",
        service_name
    );

    match provider.stop_service(service_name).await {
        Ok(()) => {}
        Err(CapabilityError::NotFound(_)) => {
            debug!(
                "[PHASE: service] [STEP: stop_service] {} not installed; nothing to stop",
                service_name
            );
            return Ok(());
        }
        Err(e) => return Err(InstallError::capability(InstallStep::StopService)(e)),
    }

    match wait_for_state(
        provider,
        service_name,
        ServiceState::Stopped,
        policy,
        InstallStep::StopService,
    )
    .await
    {
        // Deleted while we were waiting.
        Err(InstallError::Capability {
            source: CapabilityError::NotFound(_),
            ..
        }) => Ok(()),
        Err(e) => Err(e),
        Ok(()) => {
            info!(
                "[PHASE: service] [STEP: stop_service] {} stopped (duration_ms={})",
                service_name,
                started.elapsed().as_millis()
            );
            Ok(())
        }
    }
}

/// Start `service_name` and wait until it reports `Running`.
pub async fn start_service_and_wait(
    provider: &dyn CapabilityProvider,
    service_name: &str,
    policy: &ServiceWaitPolicy,
) -> Result<(), InstallError> {
    let started = Instant::now();
    debug!(
        "[PHASE: service] [STEP: start_service] start_service_and_wait entered (service_name={})",
        service_name
    );

    provider
        .start_service(service_name)
        .await
        .map_err(InstallError::capability(InstallStep::StartService))?;
    wait_for_state(
        provider,
        service_name,
        ServiceState::Running,
        policy,
        InstallStep::StartService,
    )
    .await?;

    info!(
        "[PHASE: service] [STEP: start_service] {} running (duration_ms={})",
        service_name,
        started.elapsed().as_millis()
    );
    Ok(())
}

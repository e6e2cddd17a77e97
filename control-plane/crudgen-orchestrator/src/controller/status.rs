use crate::crd::{
    Condition, ConditionStatus, ConditionType, Phase, ServiceDefinitionStatus,
};

/// Lifecycle phase. `deployed` wins over readiness so a deployed definition
/// whose image is rebuilt keeps reporting `Deployed`.
pub fn derive_phase(image_ready: bool, deployed: bool, deleting: bool) -> Phase {
    if deleting {
        Phase::Deleting
    } else if deployed {
        Phase::Deployed
    } else if image_ready {
        Phase::Ready
    } else {
        Phase::Pending
    }
}

/// Status the reconciler wants persisted. Fields owned by the image build
/// pipeline are carried over untouched.
pub fn desired_status(
    current: &ServiceDefinitionStatus,
    phase: Phase,
    observed_generation: Option<i64>,
    now: &str,
) -> ServiceDefinitionStatus {
    let deployed = current.deployed || phase == Phase::Deployed;
    let incoming = vec![
        ready_condition(current.image_ready, now),
        deployed_condition(deployed, now),
    ];
    ServiceDefinitionStatus {
        deployed,
        phase: Some(phase),
        observed_generation: observed_generation
            .or(current.observed_generation),
        conditions: Some(upsert_conditions(
            current.conditions.as_deref().unwrap_or_default(),
            incoming,
        )),
        ..current.clone()
    }
}

fn ready_condition(image_ready: bool, now: &str) -> Condition {
    let (status, reason, message) = if image_ready {
        (ConditionStatus::True, "ImageReady", "image is built")
    } else {
        (ConditionStatus::False, "ImageNotReady", "waiting for image build")
    };
    Condition {
        type_: ConditionType::Ready,
        status,
        reason: Some(reason.into()),
        message: Some(message.into()),
        last_transition_time: Some(now.to_string()),
    }
}

fn deployed_condition(deployed: bool, now: &str) -> Condition {
    let (status, reason, message) = if deployed {
        (ConditionStatus::True, "Converged", "all child resources converged")
    } else {
        (ConditionStatus::False, "NotDeployed", "child resources not converged")
    };
    Condition {
        type_: ConditionType::Deployed,
        status,
        reason: Some(reason.into()),
        message: Some(message.into()),
        last_transition_time: Some(now.to_string()),
    }
}

/// Upsert by type. A condition whose status did not change keeps its
/// original transition time.
pub fn upsert_conditions(
    existing: &[Condition],
    incoming: Vec<Condition>,
) -> Vec<Condition> {
    let mut out = existing.to_vec();
    for mut inc in incoming {
        match out.iter().position(|c| c.type_ == inc.type_) {
            Some(idx) => {
                if out[idx].status == inc.status {
                    inc.last_transition_time =
                        out[idx].last_transition_time.clone();
                }
                out[idx] = inc;
            }
            None => out.push(inc),
        }
    }
    out.sort_by_key(|c| cond_rank(&c.type_));
    out
}

fn cond_rank(t: &ConditionType) -> u8 {
    match t {
        ConditionType::Ready => 0,
        ConditionType::Deployed => 1,
        ConditionType::Unknown => 250,
    }
}

fn normalize_status(s: &ServiceDefinitionStatus) -> ServiceDefinitionStatus {
    let mut c = s.clone();
    if let Some(conds) = c.conditions.as_mut() {
        for cond in conds.iter_mut() {
            cond.last_transition_time = None;
        }
    }
    c
}

/// True when `desired` differs from `current` beyond timestamps.
pub fn should_patch_status(
    current: Option<&ServiceDefinitionStatus>,
    desired: &ServiceDefinitionStatus,
) -> bool {
    match current {
        None => true,
        Some(cur) => normalize_status(cur) != normalize_status(desired),
    }
}

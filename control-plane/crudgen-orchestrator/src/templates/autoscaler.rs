use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};

use super::RenderContext;

const MIN_REPLICAS: i32 = 1;
const MAX_REPLICAS: i32 = 10;
const CPU_UTILIZATION: i32 = 80;

pub fn autoscaler(ctx: &RenderContext<'_>) -> HorizontalPodAutoscaler {
    let def = ctx.def;
    HorizontalPodAutoscaler {
        metadata: ctx.meta(def.autoscaler_name(), def.workload_labels()),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".into()),
                kind: "Deployment".into(),
                name: def.deployment_name(),
            },
            min_replicas: Some(MIN_REPLICAS),
            max_replicas: MAX_REPLICAS,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".into(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".into(),
                    target: MetricTarget {
                        type_: "Utilization".into(),
                        average_utilization: Some(CPU_UTILIZATION),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::templates::fixtures::orders;

    #[test]
    fn targets_the_workload_on_cpu() {
        let def = orders(true);
        let settings =
            SyncSettings::new("example.com", "letsencrypt").with_autoscaler();
        let hpa = autoscaler(&RenderContext::new(&def, &settings).unwrap());
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "orders");
        assert_eq!(spec.min_replicas, Some(1));
        assert_eq!(spec.max_replicas, 10);
        let metric = &spec.metrics.unwrap()[0];
        let target = &metric.resource.as_ref().unwrap().target;
        assert_eq!(target.average_utilization, Some(80));
    }
}

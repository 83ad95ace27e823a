//! Unit tests for ClusterTemplate validation

#[cfg(test)]
mod tests {
    use crate::reconciler::Requeue;
    use crate::test_utils::*;
    use crds::{find_condition, ClusterTemplate, Condition, ConditionStatus, CLUSTER_TEMPLATE_VALIDATED};
    use std::collections::BTreeMap;

    /// Store a template whose current generation has not been validated
    fn unvalidated_template(env: &TestEnv, update: impl FnOnce(&mut ClusterTemplate)) -> ClusterTemplate {
        let mut template = create_test_cluster_template();
        template.metadata.generation = Some(2);
        update(&mut template);
        env.store.add_cluster_template(template.clone());
        template
    }

    fn validated_condition(env: &TestEnv) -> Condition {
        let stored = env.store.cluster_template(TEST_TEMPLATE_ID).unwrap();
        let status = stored.status.unwrap();
        find_condition(&status.conditions, CLUSTER_TEMPLATE_VALIDATED).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_valid_template_is_marked_validated() {
        let env = TestEnv::new();
        let template = unvalidated_template(&env, |_| {});

        assert_eq!(env.reconciler.reconcile_cluster_template(&template).await.unwrap(), Requeue::Done);
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "Completed");
        assert_eq!(condition.message, "The cluster template validation succeeded");
        let stored = env.store.cluster_template(TEST_TEMPLATE_ID).unwrap();
        assert_eq!(stored.status.unwrap().observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_all_problems_are_reported_together() {
        let env = TestEnv::new();
        env.store.add_config_map(
            TEST_TEMPLATE_NAMESPACE,
            TEST_CI_DEFAULTS,
            BTreeMap::from([
                ("clusterinstance-defaults".to_string(), TEST_CLUSTER_INSTANCE_DEFAULTS.to_string()),
                ("clusterInstallationTimeout".to_string(), "soon".to_string()),
            ]),
        );
        let template = unvalidated_template(&env, |t| {
            t.spec.templates.policy_template_defaults = "missing-defaults".to_string();
        });

        env.reconciler.reconcile_cluster_template(&template).await.unwrap();
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "Failed");
        assert!(
            condition.message.starts_with("Failed to validate the ClusterTemplate: "),
            "unexpected message: {}",
            condition.message
        );
        assert!(
            condition
                .message
                .contains("the value of key clusterInstallationTimeout from ConfigMap clusterinstance-defaults-v1 is not a valid duration string"),
            "unexpected message: {}",
            condition.message
        );
        assert!(
            condition
                .message
                .contains("; failed to get ConfigMap sno-ran-du-v4-Y-Z-1/missing-defaults: not found"),
            "unexpected message: {}",
            condition.message
        );
    }

    #[tokio::test]
    async fn test_schema_without_required_properties() {
        let env = TestEnv::new();
        let template = unvalidated_template(&env, |t| {
            let properties = t.spec.template_parameter_schema["properties"].as_object_mut().unwrap();
            properties.remove("policyTemplateParameters");
        });

        env.reconciler.reconcile_cluster_template(&template).await.unwrap();
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(
            condition
                .message
                .contains("missing required properties in the schema: policyTemplateParameters"),
            "unexpected message: {}",
            condition.message
        );
    }

    #[tokio::test]
    async fn test_editable_defaults_must_match_schema() {
        let env = TestEnv::new();
        let defaults = format!("{}baseDomain: 5\n", TEST_CLUSTER_INSTANCE_DEFAULTS);
        env.store.add_config_map(
            TEST_TEMPLATE_NAMESPACE,
            TEST_CI_DEFAULTS,
            BTreeMap::from([("clusterinstance-defaults".to_string(), defaults)]),
        );
        let template = unvalidated_template(&env, |_| {});

        env.reconciler.reconcile_cluster_template(&template).await.unwrap();
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(
            condition.message.contains("baseDomain: Invalid type. Expected: string"),
            "unexpected message: {}",
            condition.message
        );
    }

    #[tokio::test]
    async fn test_unlabelled_default_interface_is_rejected() {
        let env = TestEnv::new();
        let defaults = TEST_CLUSTER_INSTANCE_DEFAULTS.replace("          label: bootable-interface\n", "");
        env.store.add_config_map(
            TEST_TEMPLATE_NAMESPACE,
            TEST_CI_DEFAULTS,
            BTreeMap::from([("clusterinstance-defaults".to_string(), defaults)]),
        );
        let template = unvalidated_template(&env, |_| {});

        env.reconciler.reconcile_cluster_template(&template).await.unwrap();
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(
            condition.message.contains("'label' is missing for interface: eno1"),
            "unexpected message: {}",
            condition.message
        );
    }

    #[tokio::test]
    async fn test_missing_hardware_template() {
        let env = TestEnv::new();
        let template = unvalidated_template(&env, |t| {
            t.spec.templates.hw_template = Some("no-such-template".to_string());
        });

        env.reconciler.reconcile_cluster_template(&template).await.unwrap();
        let condition = validated_condition(&env);
        assert_eq!(
            condition.message,
            "Failed to validate the ClusterTemplate: failed to get HardwareTemplate no-such-template in namespace oran-o2ims: not found"
        );
    }

    #[tokio::test]
    async fn test_validated_generation_is_skipped() {
        let env = TestEnv::new();
        // Pretend the stored ConfigMaps went away; an already validated generation is not re-checked
        env.store.add_config_map(TEST_TEMPLATE_NAMESPACE, TEST_CI_DEFAULTS, BTreeMap::new());
        let template = create_test_cluster_template();

        assert_eq!(env.reconciler.reconcile_cluster_template(&template).await.unwrap(), Requeue::Done);
        let condition = validated_condition(&env);
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_invalid_template_blocks_requests() {
        let env = TestEnv::new();
        let template = unvalidated_template(&env, |t| {
            t.spec.templates.hw_template = None;
        });
        env.reconciler.reconcile_cluster_template(&template).await.unwrap();

        env.add_request("cluster-1", test_template_parameters());
        assert_eq!(env.reconcile("cluster-1").await.unwrap(), Requeue::Done);
        let condition = env.condition("cluster-1", crds::ConditionType::Validated).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(
            condition.message,
            "Failed to validate the ProvisioningRequest: failed to get the ClusterTemplate: the ClusterTemplate (sno-ran-du.v4-Y-Z-1) is not valid"
        );
    }
}

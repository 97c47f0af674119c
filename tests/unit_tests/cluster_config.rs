use cassandra_native_driver::{cfg::config::ClusterConfig, protocol::primitives::Consistency};

#[test]
fn sample_cluster_config_loads_and_normalizes() {
    let config = ClusterConfig::load_from_file("config/cluster.yaml").expect("sample config must load");

    assert_eq!(config.contact_points, vec!["127.0.0.1:9042".to_string()]);
    assert_eq!(config.local_data_center.as_deref(), Some("dc1"));
    assert!(config.policies.load_balancing.dc_aware);
    assert!(config.policies.load_balancing.token_aware);
    assert_eq!(config.query_options.consistency, Consistency::LocalOne);

    let resolved = config.resolve_contact_points().expect("contact points must resolve");
    assert_eq!(resolved, vec!["127.0.0.1:9042".parse().unwrap()]);
}

#[test]
fn consistency_round_trips_through_yaml() {
    let yaml = "local_quorum";
    let parsed: Consistency = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(parsed, Consistency::LocalQuorum);
    assert_eq!(serde_yaml::to_string(&parsed).unwrap().trim(), "local_quorum");
}

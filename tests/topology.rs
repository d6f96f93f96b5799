// Build-time validation of pipeline topologies.

use dataport_pipeline::pipeline::{
    Attachment, BridgeSpec, ChannelSpec, StageKind, StageSpec, TopologyError, TopologySpec,
};
use dataport_pipeline::stage::{Action, PolicyTable, Stage};
use dataport_pipeline::SPSC::Buffer::layout::MAX_CHANNELS;
use dataport_pipeline::{BridgeError, Message, PipelineComposer, RuntimeSettings};

fn chain(names: &[&str]) -> TopologySpec {
    // c0 -> s0 -> c1 -> s1 -> ... -> cN
    let mut spec = TopologySpec::new();
    for i in 0..=names.len() {
        spec = spec.with_channel(ChannelSpec::new(format!("c{i}")));
    }
    for (i, name) in names.iter().enumerate() {
        spec = spec.with_stage(StageSpec::new(*name, StageKind::Echo, format!("c{i}"), format!("c{}", i + 1)));
    }
    spec
}

struct Passthrough;

impl Stage for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn on_message(&mut self, message: &Message) -> Action {
        Action::Forward(message.clone())
    }
}

#[test]
fn test_linear_chain_validates_in_order() {
    // Declared out of dataflow order on purpose
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("in"))
        .with_channel(ChannelSpec::new("mid"))
        .with_channel(ChannelSpec::new("out"))
        .with_stage(StageSpec::new("second", StageKind::Echo, "mid", "out"))
        .with_stage(StageSpec::new("first", StageKind::Echo, "in", "mid"));

    assert_eq!(spec.channel_index("mid"), Some(1));
    assert_eq!(spec.channel_index("missing"), None);

    let plan = spec.validate().unwrap();
    assert_eq!(plan.stage_order, vec![1, 0]);
    assert_eq!(plan.stage_channels, vec![(1, 2), (0, 1)]);
    assert_eq!(plan.channels[1].producer, Some(Attachment::Stage(1)));
    assert_eq!(plan.channels[1].consumer, Some(Attachment::Stage(0)));
    assert_eq!(plan.open_ingress().collect::<Vec<_>>(), vec![0]);
    assert_eq!(plan.open_egress().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_two_stage_cycle_rejected() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("a_to_b"))
        .with_channel(ChannelSpec::new("b_to_a"))
        .with_stage(StageSpec::new("A", StageKind::Echo, "b_to_a", "a_to_b"))
        .with_stage(StageSpec::new("B", StageKind::Echo, "a_to_b", "b_to_a"));

    match spec.validate() {
        Err(TopologyError::Cycle(stages)) => assert_eq!(stages, vec!["A".to_owned(), "B".to_owned()]),
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[test]
fn test_cycle_fails_build_with_topology_error() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("a_to_b"))
        .with_channel(ChannelSpec::new("b_to_a"))
        .with_stage(StageSpec::new("A", StageKind::Echo, "b_to_a", "a_to_b"))
        .with_stage(StageSpec::new("B", StageKind::Echo, "a_to_b", "b_to_a"));

    match PipelineComposer::new(RuntimeSettings::default()).build(&spec) {
        Err(e @ BridgeError::Topology(_)) => {
            assert_eq!(e.code(), "TOPOLOGY_ERROR");
            assert!(e.to_string().contains("cycle"));
        }
        Err(other) => panic!("expected Topology, got {other:?}"),
        Ok(_) => panic!("cyclic topology was accepted"),
    }
}

#[test]
fn test_longer_cycle_names_only_cyclic_stages() {
    // feeder -> x -> y -> z -> x
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("src"))
        .with_channel(ChannelSpec::new("feed"))
        .with_channel(ChannelSpec::new("xy"))
        .with_channel(ChannelSpec::new("yz"))
        .with_channel(ChannelSpec::new("zx"))
        .with_stage(StageSpec::new("feeder", StageKind::Echo, "src", "feed"))
        .with_stage(StageSpec::new("x", StageKind::Echo, "zx", "xy"))
        .with_stage(StageSpec::new("y", StageKind::Echo, "xy", "yz"))
        .with_stage(StageSpec::new("z", StageKind::Echo, "yz", "zx"));

    // "feed" has a producer but nothing consumes it, which is a legal open egress;
    // the cycle is the only error
    match spec.validate() {
        Err(TopologyError::Cycle(stages)) => assert_eq!(stages, vec!["x", "y", "z"]),
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[test]
fn test_self_loop_rejected() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("loop"))
        .with_stage(StageSpec::new("spin", StageKind::Echo, "loop", "loop"));
    assert_eq!(spec.validate(), Err(TopologyError::SelfLoop("spin".to_owned())));
}

#[test]
fn test_empty_topology_rejected() {
    assert_eq!(TopologySpec::new().validate(), Err(TopologyError::NoStages));
}

#[test]
fn test_undeclared_channel_rejected() {
    let spec = chain(&["echo"]).with_stage(StageSpec::new("stray", StageKind::Echo, "c1", "nowhere"));
    assert_eq!(
        spec.validate(),
        Err(TopologyError::UndeclaredChannel {
            owner: "stage 'stray'".to_owned(),
            channel: "nowhere".to_owned(),
        })
    );
}

#[test]
fn test_duplicate_names_rejected() {
    let spec = chain(&["echo"]).with_channel(ChannelSpec::new("c0"));
    assert_eq!(
        spec.validate(),
        Err(TopologyError::DuplicateName {
            kind: "channel",
            name: "c0".to_owned(),
        })
    );

    let spec = chain(&["same", "same"]);
    assert!(matches!(spec.validate(), Err(TopologyError::DuplicateName { kind: "stage", .. })));
}

#[test]
fn test_fan_in_and_fan_out_rejected() {
    let fan_in = chain(&["a"])
        .with_channel(ChannelSpec::new("other"))
        .with_stage(StageSpec::new("b", StageKind::Echo, "other", "c1"));
    assert!(matches!(
        fan_in.validate(),
        Err(TopologyError::MultipleProducers { channel, .. }) if channel == "c1"
    ));

    let fan_out = chain(&["a"])
        .with_channel(ChannelSpec::new("other"))
        .with_stage(StageSpec::new("b", StageKind::Echo, "c0", "other"));
    assert!(matches!(
        fan_out.validate(),
        Err(TopologyError::MultipleConsumers { channel, .. }) if channel == "c0"
    ));
}

#[test]
fn test_unattached_channel_rejected() {
    let spec = chain(&["echo"]).with_channel(ChannelSpec::new("orphan"));
    assert_eq!(spec.validate(), Err(TopologyError::Unattached("orphan".to_owned())));
}

#[test]
fn test_invalid_channel_params_rejected() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("in").depth(3))
        .with_channel(ChannelSpec::new("out"))
        .with_stage(StageSpec::new("echo", StageKind::Echo, "in", "out"));
    assert!(matches!(
        spec.validate(),
        Err(TopologyError::InvalidChannel { channel, .. }) if channel == "in"
    ));
}

#[test]
fn test_bridge_wiring() {
    let ok = chain(&["echo"]).with_bridge(BridgeSpec::new("guest", "c0", "c1"));
    let plan = ok.validate().unwrap();
    assert_eq!(plan.bridge_channels, vec![(0, 1)]);
    assert_eq!(plan.channels[0].producer, Some(Attachment::Bridge(0)));
    assert_eq!(plan.channels[1].consumer, Some(Attachment::Bridge(0)));
    assert_eq!(plan.open_ingress().count(), 0);
    assert_eq!(plan.open_egress().count(), 0);

    // Reversed: ingress is written by the stage, egress read by nobody useful
    let reversed = chain(&["echo"]).with_bridge(BridgeSpec::new("guest", "c1", "c0"));
    assert!(matches!(
        reversed.validate(),
        Err(TopologyError::BridgeChannel { reason: "is not read by any stage", .. })
    ));

    let two_bridges = chain(&["echo"])
        .with_bridge(BridgeSpec::new("guest", "c0", "c1"))
        .with_bridge(BridgeSpec::new("nic", "c0", "c1"));
    assert!(matches!(two_bridges.validate(), Err(TopologyError::MultipleProducers { .. })));
}

#[test]
fn test_policy_stage_requires_table() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("in"))
        .with_channel(ChannelSpec::new("out"))
        .with_stage(StageSpec::new("policy", StageKind::PolicyEmit, "in", "out"));
    assert_eq!(spec.validate(), Err(TopologyError::MissingPolicy("policy".to_owned())));

    let fixed = TopologySpec {
        stages: vec![StageSpec::new("policy", StageKind::PolicyEmit, "in", "out").policy(PolicyTable::new())],
        ..spec
    };
    assert!(fixed.validate().is_ok());
}

#[test]
fn test_unregistered_custom_stage_fails_build() {
    let spec = TopologySpec::new()
        .with_channel(ChannelSpec::new("in"))
        .with_channel(ChannelSpec::new("out"))
        .with_stage(StageSpec::new("mystery", StageKind::Custom, "in", "out"));

    // Validation alone cannot know about registrations
    assert!(spec.validate().is_ok());

    match PipelineComposer::new(RuntimeSettings::default()).build(&spec) {
        Err(BridgeError::Topology(message)) => assert!(message.contains("mystery")),
        Err(other) => panic!("expected Topology, got {other:?}"),
        Ok(_) => panic!("unregistered custom stage was accepted"),
    }

    let pipeline = PipelineComposer::new(RuntimeSettings::default())
        .with_stage("mystery", Box::new(Passthrough))
        .build(&spec)
        .unwrap();
    assert_eq!(pipeline.stage_reports().len(), 1);
    pipeline.shutdown();
}

#[test]
fn test_invalid_settings_fail_build() {
    let settings = RuntimeSettings {
        max_payload_size: 0,
        ..RuntimeSettings::default()
    };
    assert!(matches!(
        PipelineComposer::new(settings).build(&chain(&["echo"])),
        Err(BridgeError::Config(_))
    ));
}

#[test]
fn test_channel_count_limited_to_one_region() {
    let names: Vec<String> = (0..MAX_CHANNELS).map(|i| format!("s{i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    // MAX_CHANNELS stages need MAX_CHANNELS + 1 channels
    let spec = chain(&names);
    assert_eq!(
        spec.validate(),
        Err(TopologyError::TooManyChannels {
            declared: MAX_CHANNELS + 1,
            max: MAX_CHANNELS,
        })
    );
    match PipelineComposer::new(RuntimeSettings::default()).build(&spec) {
        Err(e) => assert_eq!(e.code(), "TOPOLOGY_ERROR"),
        Ok(_) => panic!("oversized topology was accepted"),
    }

    // One fewer stage fits exactly
    assert!(chain(&names[1..]).validate().is_ok());
}

//! Integration tests for locomotives and their hubs

use std::sync::Arc;

use rs_trainz_ble::{
    channel::ChannelConfig,
    config::{HubConfig, LocoConfig, RampConfig},
    events::{Action, Event, Trigger, TriggerEvent, TriggerSource},
    hal::{MockClock, MockHost, MockTransport},
    hub::{HubKind, HubState},
    Config, Direction, Locomotive, TransportHandle,
};

const FRONT: &str = "00:07:80:d0:47:43";
const REAR: &str = "00:07:80:d0:47:44";

struct Rig {
    loco: Locomotive,
    transport: Arc<MockTransport>,
    clock: Arc<MockClock>,
    front: TransportHandle,
    rear: TransportHandle,
}

fn two_hub_config() -> LocoConfig {
    LocoConfig::new(3, "BR 218")
        .with_hub(
            HubConfig::new(FRONT, HubKind::SBrick)
                .with_channel(ChannelConfig::motor(0))
                .with_channel(ChannelConfig::light(2)),
        )
        .with_hub(
            HubConfig::new(REAR, HubKind::SBrick)
                .with_channel(ChannelConfig::motor(0).with_reversed(true)),
        )
        .with_event(Event::new(
            Trigger::new(TriggerSource::Sensor, "occupied", "block-4"),
            vec![Action::hub(FRONT, 2, 0), Action::host_pin(17, 100)],
        ))
}

fn rig(config: LocoConfig, connect: bool) -> Rig {
    let transport = Arc::new(MockTransport::new());
    let clock = Arc::new(MockClock::new());
    let front = transport.add_peripheral(FRONT);
    let rear = transport.add_peripheral(REAR);
    let loco = Locomotive::new(
        &config,
        RampConfig::default(),
        transport.clone(),
        clock.clone(),
    );

    if connect {
        for (hub, handle) in loco.hubs().iter().zip([front, rear]) {
            assert!(hub.attach_discovery(handle));
            assert!(hub.connect(5));
        }
        transport.clear_writes();
    }

    Rig {
        loco,
        transport,
        clock,
        front,
        rear,
    }
}

// ============================================================================
// Drive and direction triggers
// ============================================================================

#[test]
fn drive_from_standstill_raises_one_event_per_hub() {
    let rig = rig(two_hub_config(), true);

    let raised = rig.loco.drive(0, 50);
    assert_eq!(raised.len(), 2);
    assert!(raised
        .iter()
        .all(|e| *e == TriggerEvent::dir_changed(Direction::Forward)));

    // Changing speed in the same direction raises nothing
    assert!(rig.loco.drive(0, 80).is_empty());

    let raised = rig.loco.drive(0, 0);
    assert_eq!(raised.len(), 2);
    assert!(raised
        .iter()
        .all(|e| *e == TriggerEvent::dir_changed(Direction::Stopped)));
}

#[test]
fn drive_raises_event_only_for_hub_that_started() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 40);

    // Reconnecting resets the front hub to standstill; the rear keeps going
    let front = rig.loco.hub(0).unwrap();
    front.disconnect();
    assert!(front.attach_discovery(rig.front));
    assert!(front.connect(5));
    assert_eq!(front.current_drive_power_percent(), 0);
    assert_eq!(rig.loco.hub(1).unwrap().current_drive_power_percent(), 40);

    assert_eq!(
        rig.loco.drive(0, 40),
        vec![TriggerEvent::dir_changed(Direction::Forward)]
    );
}

#[test]
fn reversed_channel_gets_negated_target() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 50);

    let front = rig.loco.hub_by_address(FRONT).unwrap().channels();
    let rear = rig.loco.hub_by_address(REAR).unwrap().channels();
    assert_eq!(front[0].target_speed(), 127);
    assert_eq!(rear[0].target_speed(), -127);
}

#[test]
fn min_speed_lifts_low_power() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(100, 1);

    let front = rig.loco.hub(0).unwrap().channels();
    assert_eq!(front[0].target_speed(), 101);
}

#[test]
fn drive_ignored_until_all_hubs_connected() {
    let rig = rig(two_hub_config(), false);
    let front = rig.loco.hub(0).unwrap();
    front.attach_discovery(rig.front);
    front.connect(5);

    assert!(!rig.loco.all_hubs_connected());
    assert!(rig.loco.drive(0, 50).is_empty());
    assert_eq!(front.current_drive_power_percent(), 0);
}

#[test]
fn drive_with_no_hubs_connected_is_harmless() {
    let rig = rig(two_hub_config(), false);
    assert!(rig.loco.drive(0, 50).is_empty());
    assert_eq!(rig.transport.write_count(), 0);
}

// ============================================================================
// Ramp ticks
// ============================================================================

#[test]
fn tick_ramps_towards_target() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 50);

    let front = rig.loco.hub(0).unwrap();
    assert!(front.tick());
    let frames = rig.transport.writes_to(rig.front);
    // Motor one step up, light off
    assert_eq!(frames, vec![vec![0x01, 0, 0, 10], vec![0x01, 2, 0, 0]]);

    let rear = rig.loco.hub(1).unwrap();
    assert!(rear.tick());
    assert_eq!(rig.transport.writes_to(rig.rear), vec![vec![0x01, 0, 1, 10]]);
}

#[test]
fn ramp_reaches_target_and_stays() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 20);
    let front = rig.loco.hub(0).unwrap();

    for _ in 0..20 {
        assert!(front.tick());
    }
    let ch = &front.channels()[0];
    assert_eq!(ch.current_speed(), 51);
    assert!(ch.is_at_target_speed());
}

// ============================================================================
// Emergency brake
// ============================================================================

#[test]
fn emergency_brake_stops_every_hub() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 100);
    for hub in rig.loco.hubs() {
        hub.tick();
    }
    rig.transport.clear_writes();

    rig.loco.emergency_brake(true);
    assert_eq!(rig.transport.writes_to(rig.front), vec![vec![0x00, 0]]);
    assert_eq!(rig.transport.writes_to(rig.rear), vec![vec![0x00, 0]]);
    for hub in rig.loco.hubs() {
        assert!(hub.is_emergency_braking());
        assert_eq!(hub.current_drive_power_percent(), 0);
        assert_eq!(hub.channels()[0].current_speed(), 0);
    }
}

#[test]
fn brake_holds_until_released() {
    let rig = rig(two_hub_config(), true);
    rig.loco.emergency_brake(true);
    rig.loco.drive(0, 50);
    rig.transport.clear_writes();

    let front = rig.loco.hub(0).unwrap();
    front.tick();
    assert_eq!(rig.transport.writes_to(rig.front)[0], vec![0x00, 0]);
    // The drive target survives the brake
    assert_eq!(front.channels()[0].target_speed(), 127);

    rig.loco.emergency_brake(false);
    rig.transport.clear_writes();
    front.tick();
    assert_eq!(rig.transport.writes_to(rig.front)[0], vec![0x01, 0, 0, 10]);
}

// ============================================================================
// Trigger actions
// ============================================================================

#[test]
fn sensor_trigger_runs_hub_and_host_actions() {
    let rig = rig(two_hub_config(), true);
    rig.loco.hub(0).unwrap().set_lights(true);
    rig.transport.clear_writes();

    let mut host = MockHost::new();
    let event = TriggerEvent::new(TriggerSource::Sensor, "occupied", "block-4", "");
    assert_eq!(rig.loco.trigger_event(&event, &mut host), 2);

    assert_eq!(rig.transport.writes_to(rig.front), vec![vec![0x01, 2, 0, 0]]);
    assert_eq!(host.executed, vec![Action::host_pin(17, 100)]);
}

#[test]
fn failing_host_action_is_not_counted() {
    let rig = rig(two_hub_config(), true);
    let mut host = MockHost::new();
    host.failing = true;

    let event = TriggerEvent::new(TriggerSource::Sensor, "occupied", "block-4", "");
    assert_eq!(rig.loco.trigger_event(&event, &mut host), 1);
}

#[test]
fn non_matching_trigger_does_nothing() {
    let rig = rig(two_hub_config(), true);
    let mut host = MockHost::new();

    let event = TriggerEvent::new(TriggerSource::Sensor, "occupied", "block-5", "");
    assert_eq!(rig.loco.trigger_event(&event, &mut host), 0);
    assert!(host.executed.is_empty());
}

// ============================================================================
// Lights
// ============================================================================

#[test]
fn blink_alternates_and_restores() {
    let rig = rig(two_hub_config(), true);
    let front = rig.loco.hub(0).unwrap();
    front.set_lights(true);

    rig.loco.blink_lights(1200);
    assert!(front.is_blinking());

    rig.transport.clear_writes();
    rig.clock.advance(600);
    front.tick();
    assert!(rig.transport.writes_to(rig.front).contains(&vec![0x01, 2, 0, 0]));

    rig.transport.clear_writes();
    rig.clock.advance(1000);
    front.tick();
    assert!(!front.is_blinking());
    assert!(rig.transport.writes_to(rig.front).contains(&vec![0x01, 2, 0, 255]));
}

// ============================================================================
// Link loss
// ============================================================================

#[test]
fn write_failure_is_link_loss() {
    let rig = rig(two_hub_config(), true);
    rig.transport.fail_writes(FRONT);

    let front = rig.loco.hub(0).unwrap();
    assert!(!front.tick());
    assert_eq!(front.state(), HubState::Undiscovered);
    assert!(front.take_link_lost());
    assert!(!front.take_link_lost());
}

#[test]
fn link_loss_brakes_remaining_hubs() {
    let rig = rig(two_hub_config(), true);
    rig.loco.drive(0, 50);
    rig.transport.drop_link(FRONT);
    rig.loco.hub(0).unwrap().check_link();
    rig.transport.clear_writes();

    assert_eq!(rig.loco.brake_on_link_loss(), 1);
    assert!(rig.loco.hub(1).unwrap().is_emergency_braking());
    assert_eq!(rig.transport.writes_to(rig.rear), vec![vec![0x00, 0]]);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn demo_configuration_is_valid() {
    let config = Config::from_json_str(include_str!("../demos/locos.json")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.locos.len(), 2);
    let croc = &config.locos[1];
    assert_eq!(croc.hubs.len(), 2);
    assert!(croc.hubs.iter().all(|h| h.kind == HubKind::PoweredUp));
    assert!(config.locos[0].hubs[0].channels[1].reversed);
}

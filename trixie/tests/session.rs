//! End-to-end tests driving a full session against the headless backend.

use std::time::Instant;

use trixie::config::{OutputSpec, NO_CHECKS};
use trixie::core::surface::{Buffer, SurfaceId};
use trixie::core::types::{Point, Rectangle};
use trixie::input::KeyState;
use trixie::output::{OutputId, OutputMode};
use trixie::session::{Event, Request, Response, SessionState};
use trixie::{Headless, Session, TrixieConfig};

const MODE: OutputMode = OutputMode::new(1920, 1080, 60_000);

fn running(config: TrixieConfig) -> Session<Headless> {
    let mut s = Session::new(config, Headless::new()).unwrap();
    s.start().unwrap();
    s
}

fn create_surface(
    s: &mut Session<Headless>,
    client: trixie::core::client::ClientId,
    now: Instant,
) -> SurfaceId {
    match s.dispatch(client, Request::CreateSurface, now).unwrap() {
        Response::SurfaceCreated(sid) => sid,
        r => panic!("unexpected response {r:?}"),
    }
}

fn commit(
    s: &mut Session<Headless>,
    client: trixie::core::client::ClientId,
    sid: SurfaceId,
    handle: u64,
    now: Instant,
) {
    s.dispatch(
        client,
        Request::Attach {
            surface: sid,
            buffer: Buffer::new(handle, 100, 100),
            damage: vec![Rectangle::new(0, 0, 100, 100)],
        },
        now,
    )
    .unwrap();
    s.dispatch(client, Request::Commit { surface: sid }, now).unwrap();
}

#[test_log::test]
fn two_clients_stack_and_hit_test() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c1 = s.connect(now).unwrap();
    let c2 = s.connect(now).unwrap();

    let s1 = create_surface(&mut s, c1, now);
    commit(&mut s, c1, s1, 1, now);

    let s2 = create_surface(&mut s, c2, now);
    s.dispatch(c2, Request::SetPosition { surface: s2, position: Point::new(50, 50) }, now)
        .unwrap();
    commit(&mut s, c2, s2, 2, now);

    s.set_surface_order(out, vec![s1, s2]).unwrap();
    s.tick(now);

    // the presented frame draws s1 below s2, each with its own buffer
    let frame = s.backend().last_frame(out).unwrap();
    let drawn: Vec<_> = frame.elements.iter().map(|e| (e.surface, e.buffer.handle)).collect();
    assert_eq!(drawn, vec![(s1, 1), (s2, 2)]);

    // the overlap belongs to the frontmost surface
    assert_eq!(s.pointer_motion(Point::new(75, 75)), Some(s2));
    s.pointer_button(0x110, KeyState::Pressed);
    assert_eq!(s.input().keyboard_focus(), Some(s2));

    // key events now go to s2
    assert_eq!(s.keyboard_key(30, KeyState::Pressed), Some(s2));
}

#[test_log::test]
fn pending_state_never_reaches_a_frame() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();
    commit(&mut s, c, sid, 1, now);
    s.tick(now);

    // stage new content without committing, then force a repaint
    s.dispatch(
        c,
        Request::Attach {
            surface: sid,
            buffer: Buffer::new(2, 100, 100),
            damage: vec![Rectangle::new(0, 0, 100, 100)],
        },
        now,
    )
    .unwrap();
    s.set_surface_order(out, vec![sid]).unwrap();
    s.tick(now);

    let frame = s.backend().last_frame(out).unwrap();
    assert_eq!(frame.elements[0].buffer.handle, 1);

    // committing makes it visible on the next frame
    s.dispatch(c, Request::Commit { surface: sid }, now).unwrap();
    s.tick(now);
    let frame = s.backend().last_frame(out).unwrap();
    assert_eq!(frame.elements[0].buffer.handle, 2);
}

#[test_log::test]
fn client_disconnect_cascades_everywhere() {
    let now = Instant::now();
    let config = TrixieConfig::builder()
        .outputs(vec![
            OutputSpec::new("VIRT-1", MODE, 1.0, Point::zeroed()),
            OutputSpec::new("VIRT-2", MODE, 1.0, Point::new(1920, 0)),
        ])
        .finish(NO_CHECKS)
        .unwrap();
    let mut s = running(config);
    let outs = s.outputs().ids();

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    commit(&mut s, c, sid, 1, now);
    s.set_surface_order(outs[0], vec![sid]).unwrap();
    s.set_surface_order(outs[1], vec![sid]).unwrap();

    // give the surface every kind of focus
    s.pointer_motion(Point::new(10, 10));
    s.pointer_button(0x110, KeyState::Pressed);
    s.touch_down(0, Point::new(20, 20));

    s.disconnect(c).unwrap();

    // no stack, focus slot, or store entry may still refer to it
    assert!(s.surfaces().get(sid).is_none());
    for &out in &outs {
        assert!(!s.outputs().get(out).unwrap().is_mapped(sid));
    }
    assert_eq!(s.input().keyboard_focus(), None);
    assert_eq!(s.input().pointer_focus(), None);
    assert_eq!(s.input().touch_contact_count(), 0);

    // a request on the dead connection is a protocol error
    assert!(s.dispatch(c, Request::CreateSurface, now).is_err());

    // and the next frame simply omits the surface
    s.tick(now);
    assert!(s.backend().last_frame(outs[0]).unwrap().is_empty());
}

#[test_log::test]
fn detach_unmaps_but_never_destroys() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    commit(&mut s, c, sid, 1, now);
    s.set_surface_order(out, vec![sid]).unwrap();
    s.tick(now);

    // last output gone: nothing to fall back to
    let report = s.detach_output(out).unwrap();
    assert_eq!(report.unmapped, vec![sid]);
    assert!(report.reassigned.is_empty());
    assert!(s.surfaces().get(sid).is_some());

    // plugging a display back in and remapping restores the content
    let out2 = s.attach_output(OutputSpec::new("VIRT-2", MODE, 1.0, Point::zeroed()));
    s.set_surface_order(out2, vec![sid]).unwrap();
    s.tick(now);

    let frame = s.backend().last_frame(out2).unwrap();
    assert_eq!(frame.elements[0].buffer.handle, 1);
}

#[test_log::test]
fn detach_reassigns_to_surviving_output() {
    let now = Instant::now();
    let config = TrixieConfig::builder()
        .outputs(vec![
            OutputSpec::new("VIRT-1", MODE, 1.0, Point::zeroed()),
            OutputSpec::new("VIRT-2", MODE, 1.0, Point::new(1920, 0)),
        ])
        .finish(NO_CHECKS)
        .unwrap();
    let mut s = running(config);
    let outs = s.outputs().ids();

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    commit(&mut s, c, sid, 1, now);
    s.set_surface_order(outs[1], vec![sid]).unwrap();
    s.tick(now);

    let report = s.detach_output(outs[1]).unwrap();
    assert_eq!(report.reassigned, vec![sid]);

    s.tick(now);
    let frame = s.backend().last_frame(outs[0]).unwrap();
    assert_eq!(frame.elements[0].surface, sid);
}

#[test_log::test]
fn detach_mid_flight_drops_the_frame() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();
    commit(&mut s, c, sid, 1, now);

    // keep the frame stuck in the presenting phase
    s.backend_mut().set_hold_acks(true);
    s.tick(now);
    assert_eq!(s.live_frame_tokens().len(), 1);

    let report = s.detach_output(out).unwrap();
    assert_eq!(report.unmapped, vec![sid]);

    // the in-flight token retired with the output
    assert!(s.live_frame_tokens().is_empty());
    assert!(s.surfaces().get(sid).is_some());

    // the late ack for the dropped frame is ignored
    s.backend_mut().set_hold_acks(false);
    s.tick(now);
    assert!(s.live_frame_tokens().is_empty());
    assert_eq!(s.state(), SessionState::Running);
}

#[test_log::test]
fn frame_callback_fires_after_presentation() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();

    s.dispatch(c, Request::Frame { surface: sid }, now).unwrap();
    commit(&mut s, c, sid, 1, now);
    s.tick(now);

    let events = s.take_events();
    assert!(events.contains(&Event::FrameDone { client: c, surface: sid }));

    // one callback per request, not per frame
    commit(&mut s, c, sid, 2, now);
    s.tick(now);
    assert!(!s.take_events().iter().any(|e| matches!(e, Event::FrameDone { .. })));
}

#[test_log::test]
fn failed_presents_skip_without_stalling() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();
    commit(&mut s, c, sid, 1, now);

    s.backend_mut().fail_next_present(out);
    s.tick(now);

    // the frame was skipped, nothing presented, no token leaked
    assert_eq!(s.backend().presented_count(), 0);
    assert!(s.live_frame_tokens().is_empty());

    // accumulated damage survives, so the very next tick retries
    s.tick(now);
    assert_eq!(s.backend().presented_count(), 1);
    assert_eq!(s.backend().last_frame(out).unwrap().elements[0].buffer.handle, 1);
}

#[test_log::test]
fn tokens_never_leak_across_many_frames() {
    let now = Instant::now();
    let config = TrixieConfig::builder().client_timeout(None).finish(NO_CHECKS).unwrap();
    let mut s = running(config);
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();

    for i in 0u64..10_000 {
        // exercise both failure paths along the way
        match i % 97 {
            13 => s.backend_mut().fail_next_present(out),
            51 => s.backend_mut().fail_next_ack(out),
            _ => (),
        }
        commit(&mut s, c, sid, i, now);
        s.tick(now);
        assert!(s.live_frame_tokens().is_empty(), "token leaked at frame {i}");
    }

    assert!(s.backend().presented_count() > 9_000);
}

fn output_of(frame: &trixie::scene::RenderList) -> OutputId {
    frame.output.unwrap()
}

#[test_log::test]
fn frames_carry_their_output() {
    let now = Instant::now();
    let mut s = running(TrixieConfig::new());
    let out = s.outputs().ids()[0];

    let c = s.connect(now).unwrap();
    let sid = create_surface(&mut s, c, now);
    s.set_surface_order(out, vec![sid]).unwrap();
    commit(&mut s, c, sid, 1, now);
    s.tick(now);

    assert_eq!(output_of(s.backend().last_frame(out).unwrap()), out);
}

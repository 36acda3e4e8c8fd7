//! A bounded headless run of a Trixie session.
//!
//! There is no transport or display hardware here; this binary stands in
//! for both, driving the session with a couple of scripted clients so the
//! full pipeline (commit, compose, present, frame callback, shutdown) can
//! be watched through the log output.

use std::error::Error;
use std::time::Instant;

use tracing::{info, Level};
use tracing_subscriber::{fmt as logger, fmt::format::FmtSpan};

use trixie::core::surface::Buffer;
use trixie::core::types::{Point, Rectangle};
use trixie::input::KeyState;
use trixie::session::{Request, Response, SessionState};
use trixie::{Headless, Session, TrixieConfig};

const FRAMES: u64 = 120;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    logger::fmt()
        .with_span_events(FmtSpan::ACTIVE)
        .with_max_level(Level::DEBUG)
        .try_init()?;

    let config = TrixieConfig::builder().finish(|_| Ok(()))?;
    let mut session = Session::new(config, Headless::new())?;
    session.start()?;

    let now = Instant::now();
    let output = session.outputs().ids()[0];

    let c1 = session.connect(now)?;
    let c2 = session.connect(now)?;

    let s1 = create_surface(&mut session, c1, now)?;
    let s2 = create_surface(&mut session, c2, now)?;
    session.dispatch(
        c2,
        Request::SetPosition {
            surface: s2,
            position: Point::new(300, 200),
        },
        now,
    )?;
    session.set_surface_order(output, vec![s1, s2])?;

    for frame in 0..FRAMES {
        let now = Instant::now();
        // both clients redraw every frame and ask for callbacks
        for (client, surface) in [(c1, s1), (c2, s2)] {
            session.dispatch(
                client,
                Request::Attach {
                    surface,
                    buffer: Buffer::new(frame, 640, 480),
                    damage: vec![Rectangle::new(0, 0, 640, 480)],
                },
                now,
            )?;
            session.dispatch(client, Request::Frame { surface }, now)?;
            session.dispatch(client, Request::Commit { surface }, now)?;
        }

        // wiggle the pointer across the overlap
        session.pointer_motion(Point::new(310 + (frame as i32 % 20), 210));
        if frame == 10 {
            session.pointer_button(0x110, KeyState::Pressed);
            session.pointer_button(0x110, KeyState::Released);
        }

        session.tick(now);
        let delivered = session.take_events().len();
        info!("frame {}: {} events delivered", frame, delivered);
    }

    session.begin_stop();
    while session.state() != SessionState::Stopped {
        session.tick(Instant::now());
    }

    info!(
        "done: {} frames presented, session is {}",
        session.backend().presented_count(),
        session.state()
    );
    Ok(())
}

fn create_surface(
    session: &mut Session<Headless>,
    client: trixie::core::client::ClientId,
    now: Instant,
) -> Result<trixie::core::surface::SurfaceId, Box<dyn Error + Send + Sync>> {
    match session.dispatch(client, Request::CreateSurface, now)? {
        Response::SurfaceCreated(sid) => Ok(sid),
        r => Err(format!("unexpected response: {r:?}").into()),
    }
}

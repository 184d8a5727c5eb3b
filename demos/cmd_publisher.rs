// Keyboard teleop: W/S forward/back, A/D turn, R/F step size, Q quit
// Each key press publishes one command string (e.g. "u1500") and telemetry
// from the robot is printed as it arrives.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use diffbot_runtime::config::{KEY_CMD, KEY_TELEMETRY};
use diffbot_runtime::messages::Direction;
use std::time::Duration;
use tracing::info;

const STEP_SIZES: [u32; 3] = [200, 800, 1500]; // encoder pulses per press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(KEY_CMD).await?;
    let telemetry = session.declare_subscriber(KEY_TELEMETRY).await?;

    info!("Controls: W/S=forward/back, A/D=turn, R/F=step size, Q=quit");
    print_steps(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &telemetry).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    telemetry: &zenoh::pubsub::Subscriber<
        zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>,
    >,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;

    loop {
        // Print any telemetry that arrived since the last key
        while let Ok(Some(sample)) = telemetry.try_recv() {
            let payload = sample.payload().to_bytes();
            info!("Telemetry: {}", String::from_utf8_lossy(&payload));
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let direction = match code {
            KeyCode::Char('w') => Some(Direction::Up),
            KeyCode::Char('s') => Some(Direction::Down),
            KeyCode::Char('a') => Some(Direction::Left),
            KeyCode::Char('d') => Some(Direction::Right),

            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEP_SIZES.len() - 1);
                print_steps(step_idx);
                None
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                print_steps(step_idx);
                None
            }

            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => None,
        };

        if let Some(direction) = direction {
            let cmd = format!("{}{}", direction.as_char(), STEP_SIZES[step_idx]);
            info!("Sending {}", cmd);
            publisher.put(cmd).await?;
        }
    }

    Ok(())
}

fn print_steps(idx: usize) {
    info!("Step size: {} pulses", STEP_SIZES[idx]);
}

//! Shared board rig for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rm01_bsp::BoardError;
use rm01_bsp::board_display::BoardDisplay;
use rm01_bsp::context::{BoardContext, ManualClock};
use rm01_bsp::display_controller::DisplayController;
use rm01_bsp::matrix_animation::MatrixAnimator;
use rm01_bsp::network_monitor::{NetworkStatus, NetworkTarget, StaticNetworkMonitor};
use rm01_bsp::power::StaticPowerSource;
use rm01_bsp::state_manager::StateManager;
use rm01_bsp::status_interface::StatusInterface;
use rm01_bsp::touch_display::TouchDisplay;
use rm01_bsp::ws2812::{LedStrip, SharedStrip};
use smart_leds::RGB8;

/// Strip that keeps the last pushed frame
pub struct RecordingStrip {
    pixels: Vec<RGB8>,
    pub last_frame: Vec<RGB8>,
    pub refreshes: u32,
}

impl RecordingStrip {
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![RGB8::default(); len],
            last_frame: Vec::new(),
            refreshes: 0,
        }
    }
}

impl LedStrip for RecordingStrip {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<(), BoardError> {
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(BoardError::InvalidArgument)?;
        *pixel = color;
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), BoardError> {
        self.last_frame = self.pixels.clone();
        self.refreshes += 1;
        Ok(())
    }
}

/// First pixel of the last pushed frame
pub fn shown(strip: &SharedStrip<RecordingStrip>) -> RGB8 {
    let guard = strip.try_lock().expect("strip busy");
    guard.last_frame.first().copied().unwrap_or_default()
}

pub struct Rig {
    pub network: Arc<StaticNetworkMonitor>,
    pub power: Arc<StaticPowerSource>,
    pub clock: Arc<ManualClock>,
    pub ctx: BoardContext,
    pub state_manager: Arc<StateManager>,
    pub animator: Arc<MatrixAnimator>,
    pub display: Arc<DisplayController>,
    pub status: Arc<StatusInterface>,
}

impl Rig {
    /// Everything wired the way the firmware wires it, clock at 0
    pub fn new() -> Self {
        let network = Arc::new(StaticNetworkMonitor::new());
        let power = Arc::new(StaticPowerSource::new());
        let clock = Arc::new(ManualClock::new(0));
        let ctx = BoardContext::new(network.clone(), power.clone(), clock.clone());

        let animator = Arc::new(MatrixAnimator::new());
        animator.load_builtin().unwrap();

        let state_manager = Arc::new(StateManager::new(ctx.clone()));
        let display = Arc::new(DisplayController::new(
            animator.clone(),
            clock.clone(),
            None,
        ));
        display.start(&state_manager).unwrap();

        let status = Arc::new(StatusInterface::new(
            ctx.clone(),
            state_manager.clone(),
            display.clone(),
            None,
        ));
        status.start().unwrap();
        network.register_observer(status.clone()).unwrap();

        Self {
            network,
            power,
            clock,
            ctx,
            state_manager,
            animator,
            display,
            status,
        }
    }

    pub fn set_links(&self, computing: bool, application: bool, user_host: bool, internet: bool) {
        let status = |up: bool| {
            if up {
                NetworkStatus::Up
            } else {
                NetworkStatus::Down
            }
        };
        self.network
            .update(NetworkTarget::ComputingModule, status(computing));
        self.network
            .update(NetworkTarget::ApplicationModule, status(application));
        self.network.update(NetworkTarget::UserHost, status(user_host));
        self.network.update(NetworkTarget::Internet, status(internet));
    }

    pub fn touch(&self) -> (Arc<SharedStrip<RecordingStrip>>, TouchDisplay<RecordingStrip>) {
        let strip = Arc::new(SharedStrip::new(RecordingStrip::new(1)));
        let display = TouchDisplay::new(self.ctx.clone(), strip.clone(), None);
        (strip, display)
    }

    pub fn board(&self) -> (Arc<SharedStrip<RecordingStrip>>, BoardDisplay<RecordingStrip>) {
        let strip = Arc::new(SharedStrip::new(RecordingStrip::new(4)));
        let display = BoardDisplay::new(self.ctx.clone(), strip.clone(), None);
        (strip, display)
    }
}

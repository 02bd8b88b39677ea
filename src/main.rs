#![no_std]
#![no_main]

extern crate alloc;

use alloc::sync::Arc;

use embassy_time::{Duration, Timer};
use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::rmt::{Channel, Rmt};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::Executor;
use esp_hal_smartled::{SmartLedsAdapter, smart_led_buffer};
use log::{error, info, warn};
use static_cell::StaticCell;

use rm01_bsp::board_display::BoardDisplay;
use rm01_bsp::config::{
    BOARD_LED_COUNT, BOARD_LED_PIN, MATRIX_FRAME_INTERVAL_MS, MATRIX_LED_COUNT, MATRIX_LED_PIN,
    TOUCH_LED_COUNT, TOUCH_LED_PIN,
};
use rm01_bsp::display_controller::DisplayController;
use rm01_bsp::led_matrix::LedMatrix;
use rm01_bsp::matrix_animation::MatrixAnimator;
use rm01_bsp::network_monitor::StaticNetworkMonitor;
use rm01_bsp::power::StaticPowerSource;
use rm01_bsp::state_manager::StateManager;
use rm01_bsp::status_interface::StatusInterface;
use rm01_bsp::touch_display::TouchDisplay;
use rm01_bsp::ws2812::{BufferedStrip, SharedStrip};
use rm01_bsp::{BoardContext, SystemClock};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

// RMT pulse buffers: 24 codes per LED plus the end marker
const fn rmt_buffer_len(leds: usize) -> usize {
    leds * 24 + 1
}

type BoardStrip = BufferedStrip<
    SmartLedsAdapter<Channel<Blocking, 0>, { rmt_buffer_len(BOARD_LED_COUNT) }>,
    BOARD_LED_COUNT,
>;
type TouchStrip = BufferedStrip<
    SmartLedsAdapter<Channel<Blocking, 1>, { rmt_buffer_len(TOUCH_LED_COUNT) }>,
    TOUCH_LED_COUNT,
>;
type MatrixStrip = BufferedStrip<
    SmartLedsAdapter<Channel<Blocking, 2>, { rmt_buffer_len(MATRIX_LED_COUNT) }>,
    MATRIX_LED_COUNT,
>;

static MATRIX_CELL: StaticCell<LedMatrix<MatrixStrip>> = StaticCell::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("[MAIN] panic: {}", info);
    loop {}
}

#[embassy_executor::task]
async fn state_monitor_task(manager: Arc<StateManager>) -> ! {
    info!("[STATE] Monitor task running");
    manager.run().await
}

#[embassy_executor::task]
async fn touch_display_task(display: Arc<TouchDisplay<TouchStrip>>) -> ! {
    display.run().await
}

#[embassy_executor::task]
async fn board_display_task(display: Arc<BoardDisplay<BoardStrip>>) -> ! {
    display.run().await
}

/// Renders the selected matrix animation at ~33 FPS
#[embassy_executor::task]
async fn matrix_task(
    animator: Arc<MatrixAnimator>,
    matrix: &'static mut LedMatrix<MatrixStrip>,
) -> ! {
    info!("[MATRIX] Animation task running");
    loop {
        if let Err(e) = animator.render_frame(matrix) {
            warn!("[MATRIX] Frame failed: {}", e);
        }
        Timer::after(Duration::from_millis(MATRIX_FRAME_INTERVAL_MS)).await;
    }
}

#[embassy_executor::task]
async fn status_events_task(status: Arc<StatusInterface>) -> ! {
    status.run_events().await
}

#[embassy_executor::task]
async fn status_refresh_task(status: Arc<StatusInterface>) -> ! {
    status.run_auto_refresh().await
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 96 * 1024);
    esp_println::logger::init_logger(log::LevelFilter::Info);

    info!("[MAIN] RM-01 BSP {} starting", rm01_bsp::VERSION);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Collaborator handles; the prober and power-chip driver publish into these
    let network = Arc::new(StaticNetworkMonitor::new());
    let power = Arc::new(StaticPowerSource::new());
    let ctx = BoardContext::new(network.clone(), power, Arc::new(SystemClock));

    info!(
        "[MAIN] WS2812 zones: board GPIO{} x{}, touch GPIO{} x{}, matrix GPIO{} x{}",
        BOARD_LED_PIN, BOARD_LED_COUNT, TOUCH_LED_PIN, TOUCH_LED_COUNT, MATRIX_LED_PIN, MATRIX_LED_COUNT
    );
    let rmt = match Rmt::new(peripherals.RMT, Rate::from_mhz(80)) {
        Ok(rmt) => rmt,
        Err(e) => {
            error!("[MAIN] RMT initialization failed: {:?}", e);
            panic!("RMT initialization failed");
        }
    };

    let board_strip: BoardStrip = BufferedStrip::new(SmartLedsAdapter::new(
        rmt.channel0,
        peripherals.GPIO42,
        smart_led_buffer!(BOARD_LED_COUNT),
    ));
    let touch_strip: TouchStrip = BufferedStrip::new(SmartLedsAdapter::new(
        rmt.channel1,
        peripherals.GPIO45,
        smart_led_buffer!(TOUCH_LED_COUNT),
    ));
    let matrix = MATRIX_CELL.init_with(|| {
        let strip: MatrixStrip = BufferedStrip::new(SmartLedsAdapter::new(
            rmt.channel2,
            peripherals.GPIO9,
            smart_led_buffer!(MATRIX_LED_COUNT),
        ));
        match LedMatrix::new(strip) {
            Ok(matrix) => matrix,
            Err(e) => {
                error!("[MAIN] LED matrix setup failed: {}", e);
                panic!("LED matrix setup failed");
            }
        }
    });

    // Matrix animations and the state-driven controller that selects them
    let animator = Arc::new(MatrixAnimator::new());
    if let Err(e) = animator.load_builtin() {
        warn!("[MAIN] Built-in animations unavailable: {}", e);
    }

    let state_manager = Arc::new(StateManager::new(ctx.clone()));
    let display_controller = Arc::new(DisplayController::new(
        animator.clone(),
        ctx.clock.clone(),
        None,
    ));
    if let Err(e) = display_controller.start(&state_manager) {
        error!("[MAIN] Display controller start failed: {}", e);
    }

    let touch = Arc::new(TouchDisplay::new(
        ctx.clone(),
        Arc::new(SharedStrip::new(touch_strip)),
        None,
    ));
    let board = Arc::new(BoardDisplay::new(
        ctx.clone(),
        Arc::new(SharedStrip::new(board_strip)),
        None,
    ));

    let status = Arc::new(StatusInterface::new(
        ctx,
        state_manager.clone(),
        display_controller,
        None,
    ));
    if let Err(e) = status.start() {
        error!("[MAIN] Status interface start failed: {}", e);
    }
    if let Err(e) = network.register_observer(status.clone()) {
        warn!("[MAIN] Network observer registration failed: {}", e);
    }

    state_manager.start_monitoring();
    for (name, result) in [("touch", touch.start()), ("board", board.start())] {
        if let Err(e) = result {
            error!("[MAIN] {} display start failed: {}", name, e);
        }
    }

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        info!("[MAIN] Spawning tasks...");
        let spawned = [
            spawner.spawn(state_monitor_task(state_manager)),
            spawner.spawn(touch_display_task(touch)),
            spawner.spawn(board_display_task(board)),
            spawner.spawn(matrix_task(animator, matrix)),
            spawner.spawn(status_events_task(status.clone())),
            spawner.spawn(status_refresh_task(status)),
        ];
        for (index, result) in spawned.iter().enumerate() {
            match result {
                Ok(_) => {}
                Err(e) => error!("[MAIN] Task {} failed to spawn: {:?}", index, e),
            }
        }
        info!("[MAIN] System running");
    });
}

//! 状态管理器功能测试程序
//!
//! 在板上验证状态判定优先级、状态切换和观察者通知

#![no_std]
#![no_main]

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use esp_hal::clock::CpuClock;
use esp_println::println;

use rm01_bsp::context::{BoardContext, Clock, ManualClock};
use rm01_bsp::network_monitor::{NetworkStatus, NetworkTarget, StaticNetworkMonitor};
use rm01_bsp::power::StaticPowerSource;
use rm01_bsp::state_manager::{
    DetectionInputs, StateManager, StateObserver, SystemState, determine_system_state,
};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ 测试失败: {}", info);
    loop {}
}

/// 统计收到的状态切换次数
struct TransitionCounter {
    count: AtomicU32,
}

impl StateObserver for TransitionCounter {
    fn on_transition(&self, old: SystemState, new: SystemState) {
        self.count.fetch_add(1, Ordering::Relaxed);
        println!("  - 观察者收到切换: {} -> {}", old, new);
    }
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let _peripherals = esp_hal::init(config);

    // Initialize heap allocator
    esp_alloc::heap_allocator!(size: 32 * 1024);

    println!("=== 状态管理器功能测试 ===");

    // 测试优先级表
    println!("\n1. 测试状态判定优先级");

    let healthy = DetectionInputs {
        computing_module_connected: true,
        application_module_connected: true,
        user_host_connected: true,
        high_compute_load: false,
        current_temperature: 40.0,
    };
    assert_eq!(determine_system_state(&healthy), SystemState::Startup3);
    println!("✅ 全部连接: {}", determine_system_state(&healthy));

    let hot = DetectionInputs {
        current_temperature: 96.0,
        high_compute_load: true,
        ..healthy
    };
    assert_eq!(determine_system_state(&hot), SystemState::HighTemp2);
    println!("✅ 二级高温优先于高负载: {}", determine_system_state(&hot));

    let at_threshold = DetectionInputs {
        current_temperature: 85.0,
        ..healthy
    };
    assert_eq!(determine_system_state(&at_threshold), SystemState::Startup3);
    println!("✅ 85°C 不触发高温（严格大于）");

    let no_host = DetectionInputs {
        user_host_connected: false,
        ..healthy
    };
    assert_eq!(
        determine_system_state(&no_host),
        SystemState::UserHostDisconnected
    );
    println!("✅ 用户主机断开: {}", determine_system_state(&no_host));

    // 创建状态管理器实例
    println!("\n2. 测试初始状态");

    let network = Arc::new(StaticNetworkMonitor::new());
    let power = Arc::new(StaticPowerSource::new());
    let clock = Arc::new(ManualClock::new(0));
    let ctx = BoardContext::new(network.clone(), power.clone(), clock.clone());
    let manager = StateManager::new(ctx);

    assert_eq!(manager.current_state_or_default(), SystemState::Standby);
    println!("✅ 初始状态正确: {}", manager.current_state_or_default());

    // 注册观察者
    println!("\n3. 测试观察者注册");

    let counter = Arc::new(TransitionCounter {
        count: AtomicU32::new(0),
    });
    let id = match manager.register_observer(counter.clone()) {
        Ok(id) => id,
        Err(e) => panic!("注册观察者失败: {}", e),
    };
    assert_eq!(manager.observer_count(), 1);
    println!("✅ 观察者注册成功");

    // 测试启动流程
    println!("\n4. 测试模组上线流程");

    network.update(NetworkTarget::UserHost, NetworkStatus::Up);
    assert_eq!(manager.update_now(), SystemState::Startup0);
    println!("✅ 模组均未连接: {}", manager.current_state_or_default());

    clock.advance(2000);
    network.update(NetworkTarget::ComputingModule, NetworkStatus::Up);
    assert_eq!(manager.update_now(), SystemState::Startup1);
    println!("✅ 算力模组上线: {}", manager.current_state_or_default());

    clock.advance(2000);
    network.update(NetworkTarget::ApplicationModule, NetworkStatus::Up);
    assert_eq!(manager.update_now(), SystemState::Startup3);
    println!("✅ 应用模组上线: {}", manager.current_state_or_default());

    // 重复检测不产生切换
    let before = counter.count.load(Ordering::Relaxed);
    manager.update_now();
    assert_eq!(counter.count.load(Ordering::Relaxed), before);
    println!("✅ 状态未变化时不通知观察者");

    // 测试高负载
    println!("\n5. 测试高算力负载");

    power.set_power(60.0, clock.now_ms());
    assert_eq!(manager.update_now(), SystemState::HighComputeLoad);
    println!("✅ 60W 进入高负载: {}", manager.current_state_or_default());

    power.set_power(30.0, clock.now_ms());
    assert_eq!(manager.update_now(), SystemState::Startup3);
    println!("✅ 功率回落恢复: {}", manager.current_state_or_default());

    // 测试强制切换
    println!("\n6. 测试强制切换");

    if let Err(e) = manager.force_set_state(SystemState::GpuHighUsage) {
        panic!("强制切换失败: {}", e);
    }
    assert_eq!(manager.current_state_or_default(), SystemState::GpuHighUsage);
    println!("✅ 强制切换成功: {}", manager.current_state_or_default());

    // 测试状态信息
    println!("\n7. 测试状态信息");

    clock.advance(5000);
    match manager.info() {
        Ok(info) => {
            assert_eq!(info.previous_state, SystemState::Startup3);
            assert_eq!(info.time_in_current_state, 5);
            println!(
                "✅ 切换次数 {}，当前状态持续 {} 秒",
                info.state_change_count, info.time_in_current_state
            );
        }
        Err(e) => panic!("读取状态信息失败: {}", e),
    }

    // 注销观察者
    println!("\n8. 测试观察者注销");

    let seen = counter.count.load(Ordering::Relaxed);
    println!("观察者共收到 {} 次切换", seen);
    if let Err(e) = manager.unregister_observer(id) {
        panic!("注销观察者失败: {}", e);
    }
    manager.update_now();
    assert_eq!(counter.count.load(Ordering::Relaxed), seen);
    assert!(manager.unregister_observer(id).is_err());
    println!("✅ 注销后不再通知，重复注销返回错误");

    println!("\n=== 所有测试通过! ===");
    println!("状态管理器功能验证完成，系统工作正常。");

    // 保持程序运行
    loop {
        for _ in 0..1000000 {
            unsafe {
                core::ptr::read_volatile(&0u32);
            }
        }
    }
}

//! ESP32-S3 knob firmware entry point.
//!
//! Wires the hardware to the control core:
//!   - WS2812 ring on RMT (GPIO2) driven by the LED animator on the
//!     second core, with a painted stack for the health check
//!   - SSD1306 over I²C (SDA GPIO8, SCL GPIO9) driven by the render loop
//!   - encoder A/B/SW on GPIO4/5/6, buzzer on GPIO7
//!   - WiFi station + setup AP through `esp-radio` and `embassy-net`
//!   - debug console on the USB serial/JTAG port

#![no_std]
#![no_main]

use core::cell::Cell;
use core::net::Ipv4Addr;

use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_executor::Spawner;
use embassy_net::{Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_time::{Delay, Duration, Instant, Ticker};
use embedded_io_async::{Read as _, Write as _};
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rmt::Rmt;
use esp_hal::rng::Rng;
use esp_hal::system::Stack as CoreStack;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::usb_serial_jtag::{UsbSerialJtag, UsbSerialJtagRx, UsbSerialJtagTx};
use esp_hal::{Async, Blocking};
use esp_hal_smartled::Ws2812SmartLeds;
use esp_radio::wifi::WifiDevice;
use esp_storage::FlashStorage;
use panic_rtt_target as _;
use static_cell::StaticCell;

use knobfw::buzzer::{self, BuzzerChannel};
use knobfw::config::{AP_GATEWAY, CORE_TICK_MS, LED_COUNT, UI_TICK_MS};
use knobfw::console::{ConsoleChannel, LineBuffer};
use knobfw::health::HealthProbe;
use knobfw::led::strip::SmartLedRing;
use knobfw::led::{animator, LedChannel};
use knobfw::net::esp::{EspWifi, WifiLink};
use knobfw::net::portal::{ChannelPortal, PortalChannel};
use knobfw::net::{DeviceIdentity, NetworkConfig, NetworkManager, NetworkStatus};
use knobfw::storage::{FlashBackend, Preferences};
use knobfw::ui::display::OledDisplay;
use knobfw::ui::knob::{self, KnobState};
use knobfw::ui::UiContext;
use knobfw::{Coordinator, EventBus, SystemRequest};

esp_bootloader_esp_idf::esp_app_desc!();

/// RMT symbols: 24 bits per pixel plus the end marker.
const LED_BUFFER_SIZE: usize = LED_COUNT * 24 + 1;

/// Stack of the second core, which runs only the LED animator.
const LED_STACK_SIZE: usize = 8 * 1024;

const STACK_PAINT: u32 = 0xA5A5_A5A5;

type LedDriver = Ws2812SmartLeds<'static, LED_BUFFER_SIZE, Blocking>;
type Store = FlashBackend<BlockingAsync<FlashStorage<'static>>>;
type Core = Coordinator<'static, EspWifi, Store, ChannelPortal<'static>, HeapProbe>;
type Ui = UiContext<'static, OledDisplay<I2c<'static, Blocking>>>;

static BUS: EventBus = EventBus::new();
static LED: LedChannel = LedChannel::new();
static BUZZER: BuzzerChannel = BuzzerChannel::new();
static NET_STATUS: NetworkStatus = NetworkStatus::new();
static PORTAL: PortalChannel = PortalChannel::new();
static CONSOLE: ConsoleChannel = ConsoleChannel::new();
static KNOB: KnobState = KnobState::new();
static WIFI_LINK: WifiLink = WifiLink::new();

/// Deepest use of a painted stack: words still holding the paint
/// pattern, counted up from the bottom, were never touched.
struct StackWatermark {
    bottom: *const u32,
    words: usize,
}

impl StackWatermark {
    /// Fill `stack` with the paint pattern. Must run before the stack
    /// is handed to the core that uses it.
    fn paint(stack: &mut CoreStack<LED_STACK_SIZE>) -> Self {
        let bottom = stack.bottom();
        let words = LED_STACK_SIZE / 4;
        for i in 0..words {
            // SAFETY: `bottom` points at `LED_STACK_SIZE` bytes owned by
            // `stack`, which nothing is executing on yet.
            unsafe { bottom.add(i).write_volatile(STACK_PAINT) };
        }
        Self { bottom, words }
    }

    fn headroom(&self) -> usize {
        let untouched = (0..self.words)
            // SAFETY: in bounds of the painted stack, which is 'static.
            .take_while(|&i| unsafe { self.bottom.add(i).read_volatile() } == STACK_PAINT)
            .count();
        untouched * 4
    }
}

/// Heap statistics from `esp-alloc` and the LED core's stack watermark.
struct HeapProbe {
    low_water: Cell<usize>,
    led_stack: StackWatermark,
}

impl HeapProbe {
    fn new(led_stack: StackWatermark) -> Self {
        Self {
            low_water: Cell::new(esp_alloc::HEAP.free()),
            led_stack,
        }
    }
}

impl HealthProbe for HeapProbe {
    fn free_heap(&self) -> usize {
        let free = esp_alloc::HEAP.free();
        if free < self.low_water.get() {
            self.low_water.set(free);
        }
        free
    }

    fn min_free_heap(&self) -> usize {
        self.low_water.get()
    }

    fn led_stack_headroom(&self) -> Option<usize> {
        Some(self.led_stack.headroom())
    }
}

/// Log and stop; used for setup steps the firmware cannot run without.
fn halt(what: &str) -> ! {
    defmt::error!("Setup failed: {}", what);
    loop {
        core::hint::spin_loop();
    }
}

#[esp_hal::main]
fn main() -> ! {
    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    defmt::info!("knobfw {} starting", knobfw::config::FIRMWARE_VERSION);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    // LED ring
    let Ok(rmt) = Rmt::new(peripherals.RMT, Rate::from_mhz(80)) else {
        halt("RMT");
    };
    let Ok(led_driver) = Ws2812SmartLeds::<LED_BUFFER_SIZE, _>::new(rmt.channel0, peripherals.GPIO2) else {
        halt("WS2812 driver");
    };

    // Display
    let Ok(i2c) = I2c::new(peripherals.I2C0, I2cConfig::default().with_frequency(Rate::from_khz(400))) else {
        halt("I2C");
    };
    let i2c = i2c.with_sda(peripherals.GPIO8).with_scl(peripherals.GPIO9);
    let Ok(display) = OledDisplay::new(i2c) else {
        halt("display");
    };

    // Knob and buzzer
    let input_cfg = InputConfig::default().with_pull(Pull::Up);
    let enc_a = Input::new(peripherals.GPIO4, input_cfg);
    let enc_b = Input::new(peripherals.GPIO5, input_cfg);
    let enc_sw = Input::new(peripherals.GPIO6, input_cfg);
    let buzzer_pin = Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default());

    // Preferences
    static PREFS: StaticCell<Preferences<Store>> = StaticCell::new();
    let flash = BlockingAsync::new(FlashStorage::new(peripherals.FLASH));
    let prefs: &'static Preferences<Store> = PREFS.init(Preferences::new(FlashBackend::new(flash)));

    // Radio
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let Ok(radio) = esp_radio::init() else {
        halt("esp-radio");
    };
    let radio: &'static esp_radio::Controller<'static> = RADIO.init(radio);
    let Ok((wifi_controller, interfaces)) =
        esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default())
    else {
        halt("wifi");
    };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    static STA_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (sta_stack, sta_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STA_RESOURCES.init(StackResources::new()),
        seed,
    );

    let gateway = Ipv4Addr::from(AP_GATEWAY);
    static AP_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (ap_stack, ap_runner) = embassy_net::new(
        interfaces.ap,
        embassy_net::Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(gateway, 24),
            gateway: Some(gateway),
            dns_servers: Default::default(),
        }),
        AP_RESOURCES.init(StackResources::new()),
        seed ^ 0x5A5A_5A5A,
    );

    let identity = DeviceIdentity::from_mac(
        Efuse::read_base_mac_address(),
        u16::from(Efuse::major_chip_version()) * 100 + u16::from(Efuse::minor_chip_version()),
    );
    defmt::info!("Device id {}, AP {}", identity.device_id(), identity.ap_ssid());

    // The animator gets the second core to itself so its stack use can
    // be measured.
    static LED_STACK: StaticCell<CoreStack<LED_STACK_SIZE>> = StaticCell::new();
    let led_stack = LED_STACK.init(CoreStack::new());
    let led_watermark = StackWatermark::paint(led_stack);
    esp_rtos::start_second_core(
        peripherals.CPU_CTRL,
        sw_int.software_interrupt1,
        led_stack,
        move || {
            static LED_EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();
            let executor = LED_EXECUTOR.init(esp_rtos::embassy::Executor::new());
            executor.run(move |spawner: Spawner| {
                spawner.must_spawn(led_task(SmartLedRing::new(led_driver)));
            })
        },
    );

    let net = NetworkManager::new(
        EspWifi::new(&WIFI_LINK),
        &NET_STATUS,
        prefs,
        identity,
        NetworkConfig::default(),
    );
    let now = Instant::now();
    let coordinator = Coordinator::new(
        &BUS,
        LED.handle(),
        BUZZER.handle(),
        net,
        PORTAL.portal(),
        HeapProbe::new(led_watermark),
        now,
    )
    .with_console(&CONSOLE);
    let ui = UiContext::new(&BUS, LED.handle(), display, KNOB.sample(), now);

    let (console_rx, console_tx) = UsbSerialJtag::new(peripherals.USB_DEVICE).into_async().split();

    static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(move |spawner: Spawner| {
        spawner.must_spawn(buzzer_task(buzzer_pin));
        spawner.must_spawn(quadrature_task(enc_a, enc_b));
        spawner.must_spawn(button_task(enc_sw));
        spawner.must_spawn(ui_task(ui));
        spawner.must_spawn(net_task(sta_runner));
        spawner.must_spawn(net_task(ap_runner));
        spawner.must_spawn(wifi_task(wifi_controller, sta_stack));
        spawner.must_spawn(dhcp_task(ap_stack));
        spawner.must_spawn(portal_task(ap_stack));
        spawner.must_spawn(console_rx_task(console_rx));
        spawner.must_spawn(console_tx_task(console_tx));
        spawner.must_spawn(core_task(coordinator));
    })
}

/// Coordination loop (20 Hz).
#[embassy_executor::task]
async fn core_task(mut coordinator: Core) {
    coordinator.startup().await;
    let mut ticker = Ticker::every(Duration::from_millis(CORE_TICK_MS));
    loop {
        if let Some(SystemRequest::Restart) = coordinator.tick(Instant::now()).await {
            defmt::warn!("Core: restarting");
            // Let the feedback flash and chirp play out.
            embassy_time::Timer::after_millis(500).await;
            esp_hal::system::software_reset();
        }
        ticker.next().await;
    }
}

/// Render loop (~30 Hz).
#[embassy_executor::task]
async fn ui_task(mut ui: Ui) {
    let mut ticker = Ticker::every(Duration::from_millis(UI_TICK_MS));
    loop {
        ui.tick(Instant::now(), KNOB.sample());
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn led_task(mut ring: SmartLedRing<LedDriver>) {
    animator::run(&LED, &mut ring).await
}

#[embassy_executor::task]
async fn buzzer_task(mut pin: Output<'static>) {
    buzzer::run(&BUZZER, &mut pin, &mut Delay).await
}

#[embassy_executor::task]
async fn quadrature_task(a: Input<'static>, b: Input<'static>) {
    knob::quadrature_task(a, b, &KNOB).await
}

#[embassy_executor::task]
async fn button_task(pin: Input<'static>) {
    knob::button_task(pin, &KNOB).await
}

#[embassy_executor::task(pool_size = 2)]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[embassy_executor::task]
async fn wifi_task(controller: esp_radio::wifi::WifiController<'static>, sta: Stack<'static>) {
    knobfw::net::esp::wifi_task(controller, sta, &WIFI_LINK, &NET_STATUS).await
}

#[embassy_executor::task]
async fn dhcp_task(ap: Stack<'static>) {
    knobfw::net::esp::dhcp_server(ap, &WIFI_LINK).await
}

#[embassy_executor::task]
async fn portal_task(ap: Stack<'static>) {
    knobfw::net::portal::http_server(ap, &PORTAL).await
}

/// Assemble console lines from the USB serial port.
#[embassy_executor::task]
async fn console_rx_task(mut rx: UsbSerialJtagRx<'static, Async>) {
    let mut line = LineBuffer::new();
    let mut buf = [0u8; 32];
    loop {
        let n = match rx.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        for &byte in &buf[..n] {
            if let Some(complete) = line.push(byte) {
                CONSOLE.lines.send(complete).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn console_tx_task(mut tx: UsbSerialJtagTx<'static, Async>) {
    loop {
        let reply = CONSOLE.replies.receive().await;
        if tx.write_all(reply.as_bytes()).await.is_err() {
            defmt::warn!("Console: write failed");
        }
        let _ = tx.flush().await;
    }
}

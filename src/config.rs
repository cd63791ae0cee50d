//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, and thresholds live
//! here so they can be tuned in one place. Relationships between values
//! that the state machines depend on are checked at compile time at the
//! bottom of this file.

use smart_leds::RGB8;

// Firmware identity

/// Firmware version string shown on the debug console.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of the access-point SSID; the device id is appended.
pub const AP_SSID_PREFIX: &str = "Knob-";

// Task rates

/// Coordination loop period (20 Hz).
pub const CORE_TICK_MS: u64 = 50;

/// Render/input loop period (~30 Hz).
pub const UI_TICK_MS: u64 = 33;

/// LED animation loop period (50 Hz).
pub const LED_TICK_MS: u64 = 20;

// Boot / health

/// Time spent in `Booting` before the coordinator initialises subsystems.
pub const BOOT_DURATION_MS: u64 = 4000;

/// Interval between periodic health reports.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 5000;

/// Free-heap level below which a warning is logged (bytes).
pub const LOW_MEMORY_THRESHOLD: usize = 50_000;

/// Minimum LED-task stack headroom before the LED task is restarted (bytes).
pub const LED_STACK_MIN_HEADROOM: usize = 512;

/// Network state changes handled per coordinator tick before yielding.
pub const MAX_NETWORK_STEPS_PER_TICK: usize = 4;

/// Whether the device must reach the network (or the AP fallback) before
/// it becomes `Ready`.
pub const WIFI_REQUIRED: bool = !cfg!(feature = "wifi-optional");

// Event bus

/// Slots per direction on the core/UI event bus.
pub const EVENT_QUEUE_SIZE: usize = 10;

/// Maximum byte length of an event's text payload.
pub const EVENT_TEXT_LEN: usize = 255;

// Encoder
//
//   Encoder A   → GPIO4
//   Encoder B   → GPIO5
//   Encoder SW  → GPIO6 (active-low, internal pull-up)

/// Raw quadrature counts per mechanical detent.
pub const ENCODER_COUNTS_PER_DETENT: i32 = 4;

/// Presses shorter than this are clicks.
pub const CLICK_MAX_MS: u64 = 500;

/// Presses at least this long are long presses.
pub const LONG_PRESS_MS: u64 = 1000;

/// Presses at least this long are ultra-long presses (factory reset).
pub const ULTRA_LONG_PRESS_MS: u64 = 3000;

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 5;

// LED ring

/// Number of pixels on the ring.
pub const LED_COUNT: usize = 12;

/// Capacity of the LED command queue.
pub const LED_QUEUE_SIZE: usize = 10;

/// Boot sweep: time between pixel steps.
pub const LED_SWEEP_STEP_MS: u64 = 70;

/// Boot sweep flare: rise to full brightness.
pub const LED_SWEEP_FLARE_MS: u64 = 150;

/// Boot sweep tail: fade from full brightness to dark.
pub const LED_SWEEP_TAIL_MS: u64 = 3000;

/// Hard limit on the boot animation, measured from scheduler start.
pub const LED_BOOT_TIMEOUT_MS: u64 = 4000;

/// Minimum interval between pulsation updates (10 Hz).
pub const LED_PULSE_INTERVAL_MS: u64 = 100;

/// Pulsation rise target and duration.
pub const LED_PULSE_HIGH: u8 = 100;
pub const LED_PULSE_UP_MS: u64 = 1500;

/// Pulsation fall target and duration.
pub const LED_PULSE_LOW: u8 = 10;
pub const LED_PULSE_DOWN_MS: u64 = 2000;

/// Inactivity before the ring dims and starts pulsating.
pub const LED_IDLE_TIMEOUT_MS: u64 = 5000;

/// Idle dim target brightness and fade duration.
pub const LED_IDLE_BRIGHTNESS: u8 = 10;
pub const LED_IDLE_FADE_MS: u64 = 1000;

/// Loading animation: brightness extremes and half-period.
pub const LED_LOADING_HIGH: u8 = 250;
pub const LED_LOADING_LOW: u8 = 1;
pub const LED_LOADING_FADE_MS: u64 = 50;

/// Brightness reached when a loading phase ends.
pub const LED_LOADING_DONE_BRIGHTNESS: u8 = 200;
pub const LED_LOADING_DONE_FADE_MS: u64 = 150;

/// Default ring color (azure).
pub const LED_BASE_COLOR: RGB8 = RGB8 { r: 0, g: 181, b: 214 };

/// Color shown while something is loading.
pub const LED_LOADING_COLOR: RGB8 = RGB8 { r: 244, g: 70, b: 17 };

// Feedback colors used by the coordinator

pub const FLASH_CONNECTED: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
pub const FLASH_CLICK: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
pub const FLASH_LONG_PRESS: RGB8 = RGB8 { r: 255, g: 165, b: 0 };
pub const FLASH_AP_MODE: RGB8 = RGB8 { r: 0, g: 100, b: 255 };
pub const FLASH_ERROR: RGB8 = RGB8 { r: 255, g: 0, b: 0 };

pub const FLASH_CONNECTED_MS: u64 = 500;
pub const FLASH_CLICK_MS: u64 = 200;
pub const FLASH_LONG_PRESS_MS: u64 = 500;
pub const FLASH_AP_MODE_MS: u64 = 1000;
pub const FLASH_AP_CLIENT_MS: u64 = 300;
pub const FLASH_ERROR_MS: u64 = 1000;

// Display (SSD1306 over I²C)
//
//   I²C SDA  → GPIO8
//   I²C SCL  → GPIO9

/// Backlight/contrast level after a wake-up.
pub const DISPLAY_WAKE_BRIGHTNESS: u8 = 180;

/// Level the display dims down to when idle.
pub const DISPLAY_IDLE_BRIGHTNESS: u8 = 10;

/// Inactivity before dimming starts.
pub const DISPLAY_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Dimming step size and interval.
pub const DISPLAY_DIM_STEP: u8 = 2;
pub const DISPLAY_DIM_INTERVAL_MS: u64 = 20;

// Buzzer
//
//   Buzzer → GPIO7

/// Buzzer duty cycle in percent.
pub const BUZZER_DUTY_PERCENT: u32 = 20;

/// Capacity of the buzzer request queue.
pub const BUZZER_QUEUE_SIZE: usize = 4;

// Network

/// Default station connection timeout.
pub const WIFI_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Soft-AP gateway address.
pub const AP_GATEWAY: [u8; 4] = [192, 168, 4, 1];

/// Page shown to the first client that joins the soft-AP.
pub const AP_SETUP_URL: &str = "http://192.168.4.1/setup";

/// Soft-AP radio channel.
pub const AP_CHANNEL: u8 = 6;

/// Maximum SSID / passphrase lengths (802.11 / WPA2).
pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;

// Preferences

/// Maximum byte length of a stored preference value.
pub const PREF_VALUE_LEN: usize = 64;

/// Number of distinct preference keys.
pub const PREF_KEY_COUNT: usize = 6;

pub const DEFAULT_BRIGHTNESS: &str = "80";
pub const DEFAULT_LED_COLOR: &str = "azure";
pub const DEFAULT_LANGUAGE: &str = "it";
pub const DEFAULT_THEME: &str = "light";

/// Flash region reserved for preferences (offset into the data partition).
pub const STORAGE_FLASH_START: u32 = 0x3F_0000;

/// Size of the preferences region (4 KB sectors).
pub const STORAGE_FLASH_SIZE: u32 = 4 * 4096;

// Compile-time checks

const _: () = assert!(CLICK_MAX_MS < LONG_PRESS_MS && LONG_PRESS_MS < ULTRA_LONG_PRESS_MS);
const _: () = assert!(ENCODER_COUNTS_PER_DETENT > 0);
const _: () = assert!(EVENT_QUEUE_SIZE > 0 && LED_QUEUE_SIZE > 0);
const _: () = assert!(LED_PULSE_LOW < LED_PULSE_HIGH);
const _: () = assert!(LED_COUNT >= 2);
const _: () = assert!(DISPLAY_IDLE_BRIGHTNESS < DISPLAY_WAKE_BRIGHTNESS);
const _: () = assert!(CORE_TICK_MS < HEALTH_CHECK_INTERVAL_MS);
const _: () = assert!(SSID_MAX_LEN + 1 + PASSWORD_MAX_LEN <= EVENT_TEXT_LEN);
const _: () = assert!(PASSWORD_MAX_LEN <= PREF_VALUE_LEN);

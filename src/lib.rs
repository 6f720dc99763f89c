// Metronome Engine - sample-accurate click scheduling and mixing
// Device-driven playlist cursor, window mixer and note notifications

// Module declarations
pub mod audio;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod notify;

// Re-exports for convenience
pub use audio::{InMemorySampleRepository, SampleRepository, SoundId};
pub use config::EngineConfig;
pub use device::{default_output_device, DeviceListener, OutputDevice, SimulatedDevice};
pub use engine::{EngineEvent, MarkerAnchor, MetronomeEngine, PlaylistItem};
pub use error::{AudioError, ErrorCode};
pub use notify::{Executor, InlineExecutor, ListenerHandle, NoteEvent, QueueExecutor, TokioExecutor};

/// Initialize Android logging
///
/// Safe to call more than once; only the first call installs a subscriber.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    match tracing_android::layer("MetronomeEngine") {
        Ok(layer) => {
            let _ = tracing_subscriber::registry().with(layer).try_init();
        }
        Err(err) => eprintln!("[Logging] Android log layer unavailable: {}", err),
    }
}

/// Initialize stderr logging at INFO level
///
/// Safe to call more than once; only the first call installs a subscriber.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .try_init();
}

/// JNI_OnLoad is called when the native library is loaded by Android
/// This function initializes the Android context required by oboe-rs
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: jni::JavaVM, _reserved: *mut std::ffi::c_void) -> jni::sys::jint {
    init_logging();

    log::info!("JNI_OnLoad called - initializing Android context");

    // Oboe reaches the audio subsystem through ndk-context; it must be set
    // before any stream is opened
    // SAFETY: the JavaVM pointer is valid for the life of the process. No
    // Android Context object is available here.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer() as *mut std::ffi::c_void,
            std::ptr::null_mut(),
        );
    }

    log::info!("Android context initialized successfully");

    jni::sys::JNI_VERSION_1_6
}

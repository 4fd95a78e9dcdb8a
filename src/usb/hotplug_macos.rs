//! macOS IOKit-based USB hotplug detection
//!
//! Registers matched/terminated notifications for USB devices of one vendor
//! and reads each device's registry properties into a [`DeviceDescriptor`].
//! Devices already present when the watcher starts are reported as attached.

use super::{DeviceDescriptor, HotplugError, HotplugEvent};
use core_foundation::base::{CFType, TCFType};
use core_foundation::number::CFNumber;
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopRunInMode};
use core_foundation::string::CFString;
use core_foundation_sys::base::kCFAllocatorDefault;
use core_foundation_sys::dictionary::CFDictionarySetValue;
use core_foundation_sys::runloop::{
    kCFRunLoopRunFinished, kCFRunLoopRunStopped, CFRunLoopAddSource, CFRunLoopGetCurrent,
    CFRunLoopSourceRef, CFRunLoopStop,
};
use io_kit_sys::types::{io_iterator_t, io_object_t};
use io_kit_sys::*;
use mach2::port::MACH_PORT_NULL;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Name used when a device has no product string
const UNKNOWN_DEVICE_NAME: &str = "USB Device";

/// Hotplug watcher for USB devices on macOS
pub struct HotplugWatcher {
    stop: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
    run_loop: Arc<parking_lot::Mutex<Option<CFRunLoop>>>,
}

/// Context passed to IOKit callbacks
struct CallbackContext {
    event_tx: mpsc::UnboundedSender<HotplugEvent>,
    attached: bool,
}

impl HotplugWatcher {
    /// Start watching USB devices with the given vendor ID
    ///
    /// `_poll_interval` is unused; IOKit delivers notifications directly.
    pub fn start(
        vendor_id: u16,
        _poll_interval: Duration,
        event_tx: mpsc::UnboundedSender<HotplugEvent>,
    ) -> Result<Self, HotplugError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let run_loop = Arc::new(parking_lot::Mutex::new(None));
        let run_loop_clone = Arc::clone(&run_loop);

        let thread_handle = thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                if let Err(e) = run_watcher(vendor_id, event_tx, stop_clone, run_loop_clone) {
                    error!("Hotplug watcher error: {}", e);
                }
            })?;

        Ok(Self {
            stop,
            thread_handle: Some(thread_handle),
            run_loop,
        })
    }

    /// Stop the watcher and wait for its thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(rl) = self.run_loop.lock().take() {
            unsafe {
                CFRunLoopStop(rl.as_concrete_TypeRef());
            }
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_watcher(
    vendor_id: u16,
    event_tx: mpsc::UnboundedSender<HotplugEvent>,
    stop: Arc<AtomicBool>,
    run_loop_storage: Arc<parking_lot::Mutex<Option<CFRunLoop>>>,
) -> Result<(), HotplugError> {
    unsafe {
        let mut master_port: mach2::port::mach_port_t = MACH_PORT_NULL;
        let kr = IOMasterPort(MACH_PORT_NULL, &mut master_port);
        if kr != 0 {
            return Err(HotplugError::IoKit {
                call: "IOMasterPort",
                code: kr,
            });
        }

        let notify_port = IONotificationPortCreate(master_port);
        if notify_port.is_null() {
            return Err(HotplugError::IoKit {
                call: "IONotificationPortCreate",
                code: 0,
            });
        }

        let run_loop_source: CFRunLoopSourceRef = IONotificationPortGetRunLoopSource(notify_port);
        if run_loop_source.is_null() {
            IONotificationPortDestroy(notify_port);
            return Err(HotplugError::IoKit {
                call: "IONotificationPortGetRunLoopSource",
                code: 0,
            });
        }

        let run_loop = CFRunLoopGetCurrent();
        CFRunLoopAddSource(run_loop, run_loop_source, kCFRunLoopDefaultMode);
        *run_loop_storage.lock() = Some(CFRunLoop::wrap_under_get_rule(run_loop));

        let matching_dict = IOServiceMatching(kIOUSBDeviceClassName.as_ptr() as *const i8);
        if matching_dict.is_null() {
            IONotificationPortDestroy(notify_port);
            return Err(HotplugError::IoKit {
                call: "IOServiceMatching",
                code: 0,
            });
        }

        let vendor_key = CFString::new("idVendor");
        let vendor_num = CFNumber::from(vendor_id as i32);
        CFDictionarySetValue(
            matching_dict,
            vendor_key.as_concrete_TypeRef() as *const c_void,
            vendor_num.as_concrete_TypeRef() as *const c_void,
        );

        // Reclaimed after the run loop exits, which also closes the event channel
        let arrival_ctx = Box::into_raw(Box::new(CallbackContext {
            event_tx: event_tx.clone(),
            attached: true,
        }));
        let removal_ctx = Box::into_raw(Box::new(CallbackContext {
            event_tx,
            attached: false,
        }));
        let release_contexts = || {
            drop(Box::from_raw(arrival_ctx));
            drop(Box::from_raw(removal_ctx));
        };

        // Each registration consumes one reference to the matching dictionary
        CFRetain(matching_dict as *const c_void);

        let mut arrival_iterator: io_iterator_t = 0;
        let kr = IOServiceAddMatchingNotification(
            notify_port,
            kIOMatchedNotification.as_ptr() as *mut i8,
            matching_dict,
            device_notification_callback,
            arrival_ctx as *mut c_void,
            &mut arrival_iterator,
        );
        if kr != 0 {
            IONotificationPortDestroy(notify_port);
            release_contexts();
            return Err(HotplugError::IoKit {
                call: "IOServiceAddMatchingNotification (arrival)",
                code: kr,
            });
        }

        // Draining arms the notification; devices found here are already plugged in
        device_notification_callback(arrival_ctx as *mut c_void, arrival_iterator);

        let mut removal_iterator: io_iterator_t = 0;
        let kr = IOServiceAddMatchingNotification(
            notify_port,
            kIOTerminatedNotification.as_ptr() as *mut i8,
            matching_dict,
            device_notification_callback,
            removal_ctx as *mut c_void,
            &mut removal_iterator,
        );
        if kr != 0 {
            IOObjectRelease(arrival_iterator);
            IONotificationPortDestroy(notify_port);
            release_contexts();
            return Err(HotplugError::IoKit {
                call: "IOServiceAddMatchingNotification (removal)",
                code: kr,
            });
        }

        drain_iterator(removal_iterator);

        info!("IOKit hotplug watcher started for VID:0x{:04X}", vendor_id);

        while !stop.load(Ordering::SeqCst) {
            let result = CFRunLoopRunInMode(kCFRunLoopDefaultMode, 1.0, 0);
            if result == kCFRunLoopRunStopped || result == kCFRunLoopRunFinished {
                break;
            }
        }

        info!("IOKit hotplug watcher stopped");

        IOObjectRelease(arrival_iterator);
        IOObjectRelease(removal_iterator);
        IONotificationPortDestroy(notify_port);
        release_contexts();
    }

    Ok(())
}

/// Drain an iterator without reporting, to arm the notification
unsafe fn drain_iterator(iterator: io_iterator_t) {
    loop {
        let service = IOIteratorNext(iterator);
        if service == 0 {
            break;
        }
        IOObjectRelease(service);
    }
}

/// Shared callback for matched and terminated notifications
unsafe extern "C" fn device_notification_callback(refcon: *mut c_void, iterator: io_iterator_t) {
    let ctx = &*(refcon as *const CallbackContext);

    // Draining is required to re-arm the notification
    loop {
        let service = IOIteratorNext(iterator);
        if service == 0 {
            break;
        }
        let device = read_descriptor(service);
        IOObjectRelease(service);

        debug!(
            "USB device {}: {}",
            if ctx.attached { "arrived" } else { "removed" },
            device.summary()
        );
        let event = if ctx.attached {
            HotplugEvent::Attached(device)
        } else {
            HotplugEvent::Detached(device)
        };
        let _ = ctx.event_tx.send(event);
    }
}

unsafe fn read_descriptor(service: io_object_t) -> DeviceDescriptor {
    let name = string_property(service, "USB Product Name")
        .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
    let vendor_id = number_property(service, "idVendor").unwrap_or(0) as u16;
    let product_id = number_property(service, "idProduct").unwrap_or(0) as u16;
    let serial_number = string_property(service, "USB Serial Number");
    DeviceDescriptor::new(name, vendor_id, product_id, serial_number)
}

unsafe fn property(service: io_object_t, key: &str) -> Option<CFType> {
    let key = CFString::new(key);
    let value = IORegistryEntryCreateCFProperty(
        service,
        key.as_concrete_TypeRef(),
        kCFAllocatorDefault,
        0,
    );
    if value.is_null() {
        None
    } else {
        Some(CFType::wrap_under_create_rule(value))
    }
}

unsafe fn string_property(service: io_object_t, key: &str) -> Option<String> {
    property(service, key)?
        .downcast::<CFString>()
        .map(|s| s.to_string())
}

unsafe fn number_property(service: io_object_t, key: &str) -> Option<i64> {
    property(service, key)?.downcast::<CFNumber>()?.to_i64()
}

// IOKit constants not in io-kit-sys (using Apple's naming convention)
#[allow(non_upper_case_globals)]
const kIOUSBDeviceClassName: &str = "IOUSBDevice\0";
#[allow(non_upper_case_globals)]
const kIOMatchedNotification: &str = "IOServiceMatched\0";
#[allow(non_upper_case_globals)]
const kIOTerminatedNotification: &str = "IOServiceTerminate\0";

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRetain(cf: *const c_void);
}

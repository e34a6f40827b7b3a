use crate::error::{CoreError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Point-in-time description of an audio device.
///
/// `index` is the device's position in the enumeration across every
/// available host, so it stays meaningful after filtering. The list is not
/// re-queried when hardware changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub host_api: String,
}

/// List input-capable devices on the platform's primary host API
pub fn list_input_devices() -> Result<Vec<InputDevice>> {
    let primary = cpal::default_host().id().name();
    let all = enumerate()?
        .into_iter()
        .map(|(info, _device)| info)
        .collect();
    Ok(filter_input_devices(all, primary))
}

pub fn filter_input_devices(devices: Vec<InputDevice>, primary_host: &str) -> Vec<InputDevice> {
    devices
        .into_iter()
        .filter(|d| d.max_input_channels > 0 && d.host_api == primary_host)
        .collect()
}

/// Resolve a catalog entry back to a live device handle
///
/// Fails when the device at that index vanished or was replaced since the
/// catalog was taken.
pub(crate) fn resolve(device: &InputDevice) -> Result<cpal::Device> {
    enumerate()?
        .into_iter()
        .find(|(info, _)| info.index == device.index)
        .filter(|(info, _)| info.name == device.name && info.host_api == device.host_api)
        .map(|(_, handle)| handle)
        .ok_or_else(|| CoreError::unavailable(device.index, "device is no longer present"))
}

fn enumerate() -> Result<Vec<(InputDevice, cpal::Device)>> {
    let mut found = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                tracing::debug!("Skipping audio host {}: {}", host_id.name(), e);
                continue;
            }
        };

        let devices = host
            .devices()
            .map_err(|e| CoreError::DeviceQuery(e.to_string()))?;

        for device in devices {
            let info = InputDevice {
                index: found.len(),
                name: device.name().unwrap_or_else(|_| "<unknown>".to_string()),
                max_input_channels: max_input_channels(&device),
                host_api: host_id.name().to_string(),
            };
            found.push((info, device));
        }
    }

    Ok(found)
}

fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

//! Device enumeration, open handles and option snapshots.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use super::auth::{Authenticator, resource_name};
use super::options::OptionIndex;
use super::store::{OptionSnapshot, PersistedValue};
use crate::backend::{
    Backend, Credentials, DeviceInfo, HandleId, OptionDescriptor, OptionKind, OptionValue,
    SetInfo,
};
use crate::error::TwainError;
use crate::protocol::Fix32;

/// Name under which a device's preferences are stored.
///
/// Built from vendor, model and backend name so the same scanner keeps its
/// settings when it is reached over the network or enumerated in a
/// different order.
pub fn display_name(info: &DeviceInfo) -> String {
    let mut name = info.name.as_str();
    if let Some(rest) = name.strip_prefix("net:") {
        name = rest.split_once(':').map_or(rest, |(_, path)| path);
    }
    let backend = name.split(':').next().unwrap_or(name);
    format!("{} {} ({})", info.vendor, info.model, backend)
}

/// Sole owner of the backend and of every open device handle.
///
/// The rest of the engine refers to devices by index and to options by
/// their 1-based option number.
pub struct DeviceSession<B: Backend> {
    backend: B,
    devices: Option<Vec<DeviceInfo>>,
    handles: HashMap<usize, HandleId>,
    current: Option<usize>,
    options: OptionIndex,
    /// Option values seen when each device was first opened.
    factory: HashMap<usize, HashMap<String, OptionValue>>,
}

impl<B: Backend> DeviceSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            devices: None,
            handles: HashMap::new(),
            current: None,
            options: OptionIndex::default(),
            factory: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Enumerate devices on first use and return the cached list.
    pub fn enumerate(&mut self) -> Result<&[DeviceInfo], TwainError> {
        if self.devices.is_none() {
            let found = self.backend.devices()?;
            info!(count = found.len(), "Enumerated devices");
            self.devices = Some(found);
        }
        Ok(self.devices.as_deref().unwrap_or_default())
    }

    /// Devices seen by the last enumeration.
    pub fn known_devices(&self) -> &[DeviceInfo] {
        self.devices.as_deref().unwrap_or_default()
    }

    pub fn find_device(&self, display: &str) -> Option<usize> {
        self.known_devices()
            .iter()
            .position(|d| display_name(d) == display)
    }

    /// Open device `index` and make it current.
    ///
    /// A cached handle is reused. Access-denied failures are retried with
    /// credentials from `auth` until the open succeeds or `auth` cancels;
    /// on any failure the session is left as it was.
    #[instrument(skip(self, auth))]
    pub fn open(
        &mut self,
        index: usize,
        auth: &dyn Authenticator,
    ) -> Result<HandleId, TwainError> {
        let device = self
            .enumerate()?
            .get(index)
            .cloned()
            .ok_or(TwainError::NoDevice)?;

        let handle = match self.handles.get(&index) {
            Some(handle) => *handle,
            None => {
                let handle = self.open_with_auth(&device.name, auth)?;
                self.handles.insert(index, handle);
                handle
            }
        };

        self.current = Some(index);
        self.options = OptionIndex::build(&self.backend, handle);
        if !self.factory.contains_key(&index) {
            let values = self.current_values();
            self.factory.insert(index, values);
        }
        info!(device = %device.name, "Device selected");
        Ok(handle)
    }

    fn open_with_auth(
        &self,
        name: &str,
        auth: &dyn Authenticator,
    ) -> Result<HandleId, TwainError> {
        let mut credentials: Option<Credentials> = None;
        let mut rejected = 0;
        loop {
            match self.backend.open(name, credentials.as_ref()) {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_access_denied() => {
                    if credentials.is_some() {
                        rejected += 1;
                    }
                    let resource = e.context.unwrap_or_else(|| name.to_string());
                    let shown = resource_name(&resource);
                    info!(resource = %shown, "Authentication required");
                    let answer = auth.authenticate(shown, rejected).ok_or_else(|| {
                        TwainError::AuthenticationCancelled {
                            resource: shown.to_string(),
                        }
                    })?;
                    credentials = Some(Credentials::for_resource(
                        &resource,
                        &answer.username,
                        &answer.password,
                    ));
                }
                Err(e) => {
                    warn!(device = %name, error = %e, "Open failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Close every open handle and forget the enumeration.
    pub fn close_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            self.backend.close(handle);
        }
        self.current = None;
        self.devices = None;
        self.options = OptionIndex::default();
        self.factory.clear();
    }

    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_device(&self) -> Option<&DeviceInfo> {
        self.known_devices().get(self.current?)
    }

    pub fn current_display_name(&self) -> Option<String> {
        self.current_device().map(display_name)
    }

    /// Handle of the current device.
    pub fn handle(&self) -> Result<HandleId, TwainError> {
        self.current
            .and_then(|i| self.handles.get(&i).copied())
            .ok_or(TwainError::NoDevice)
    }

    pub fn options(&self) -> &OptionIndex {
        &self.options
    }

    pub fn reload_options(&mut self) -> Result<(), TwainError> {
        self.options = OptionIndex::build(&self.backend, self.handle()?);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<OptionValue, TwainError> {
        Ok(self.backend.get_option(self.handle()?, index)?)
    }

    /// Current value of the active option called `name`.
    pub fn get_named(&self, name: &str) -> Result<Option<OptionValue>, TwainError> {
        match self.options.active(name) {
            Some((index, _)) => self.get(index).map(Some),
            None => Ok(None),
        }
    }

    /// Set an option, rebuilding the index when the backend asks for it.
    pub fn set(
        &mut self,
        index: usize,
        value: OptionValue,
    ) -> Result<(OptionValue, SetInfo), TwainError> {
        let handle = self.handle()?;
        let (applied, info) = self.backend.set_option(handle, index, value)?;
        debug!(
            option = self.options.descriptor(index).map(|d| d.name.as_str()),
            inexact = info.inexact,
            reload = info.reload_options,
            "Option set"
        );
        if info.reload_options {
            self.options = OptionIndex::build(&self.backend, handle);
        }
        Ok((applied, info))
    }

    /// Let the backend choose the value of an option.
    pub fn set_auto(&mut self, index: usize) -> Result<SetInfo, TwainError> {
        let handle = self.handle()?;
        let info = self.backend.set_auto(handle, index)?;
        debug!(
            option = self.options.descriptor(index).map(|d| d.name.as_str()),
            "Option set to automatic"
        );
        if info.reload_options {
            self.options = OptionIndex::build(&self.backend, handle);
        }
        Ok(info)
    }

    /// Value of `name` when the current device was first opened.
    pub fn factory_value(&self, name: &str) -> Option<&OptionValue> {
        self.factory.get(&self.current?)?.get(name)
    }

    fn current_values(&self) -> HashMap<String, OptionValue> {
        self.persistable()
            .filter_map(|(index, desc)| Some((desc.name.clone(), self.get(index).ok()?)))
            .collect()
    }

    fn persistable(&self) -> impl Iterator<Item = (usize, &OptionDescriptor)> {
        self.options.iter().filter(|(_, d)| {
            d.has_value() && !d.name.is_empty() && d.caps.active && d.caps.settable && d.caps.gettable
        })
    }

    /// Every active, settable option of the current device.
    pub fn snapshot(&self) -> OptionSnapshot {
        self.persistable()
            .filter_map(|(index, desc)| {
                let value = self.get(index).ok()?;
                Some((desc.name.clone(), to_persisted(desc, &value)?))
            })
            .collect()
    }

    /// Apply a snapshot in option order, so that options which switch
    /// others on (the scan mode) are set before those they govern.
    pub fn restore(&mut self, snapshot: &OptionSnapshot) -> Result<bool, TwainError> {
        let mut reloaded = false;
        let mut index = 1;
        while let Some(desc) = self.options.descriptor(index).cloned() {
            index += 1;
            if !desc.caps.active || !desc.caps.settable {
                continue;
            }
            let Some(value) = snapshot.get(&desc.name).and_then(|v| to_option_value(&desc, v))
            else {
                continue;
            };
            match self.set(index - 1, value) {
                Ok((_, info)) => reloaded |= info.reload_options,
                Err(e) => debug!(option = %desc.name, error = %e, "Saved value rejected"),
            }
        }
        Ok(reloaded)
    }
}

fn to_persisted(desc: &OptionDescriptor, value: &OptionValue) -> Option<PersistedValue> {
    let word = |w: i32| {
        if desc.is_fixed() {
            Fix32::from_bits(w).to_f64()
        } else {
            w as f64
        }
    };
    Some(match value {
        OptionValue::Bool(b) => PersistedValue::Bool(*b),
        OptionValue::Word(w) => PersistedValue::Number(word(*w)),
        OptionValue::Words(ws) => PersistedValue::Numbers(ws.iter().map(|w| word(*w)).collect()),
        OptionValue::Text(s) => PersistedValue::Text(s.clone()),
        OptionValue::Button => return None,
    })
}

fn to_option_value(desc: &OptionDescriptor, value: &PersistedValue) -> Option<OptionValue> {
    let word = |v: f64| {
        if desc.is_fixed() {
            Fix32::from_f64(v).to_bits()
        } else {
            v.round() as i32
        }
    };
    match (&desc.kind, value) {
        (OptionKind::Bool, PersistedValue::Bool(b)) => Some(OptionValue::Bool(*b)),
        (OptionKind::Int(_) | OptionKind::Fixed(_), PersistedValue::Number(v)) => {
            Some(OptionValue::Word(word(*v)))
        }
        (OptionKind::Int(_) | OptionKind::Fixed(_), PersistedValue::Numbers(vs)) => {
            Some(OptionValue::Words(vs.iter().map(|v| word(*v)).collect()))
        }
        (OptionKind::String { .. }, PersistedValue::Text(s)) => Some(OptionValue::Text(s.clone())),
        _ => None,
    }
}

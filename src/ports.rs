use bitflags::bitflags;

use crate::api::Api;
use crate::ump::UmpVersion;

/// How a port is attached to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    #[default]
    Unknown,
    Software,
    Loopback,
    Hardware,
    Usb,
    Bluetooth,
    Pci,
    Network,
}

impl Transport {
    /// True for the transports that exist without a physical device.
    pub fn is_virtual(self) -> bool {
        matches!(self, Transport::Software | Transport::Loopback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Identifies a MIDI port within a backend session.
///
/// The `handle` is an opaque value that stays stable as long as the backend
/// session is alive and the port is present; two identifiers are equal iff
/// they belong to the same API and carry the same handle. All the string
/// fields are informational.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub(crate) api: Api,
    pub handle: u64,
    pub port_name: String,
    pub display_name: String,
    pub device_name: String,
    pub manufacturer: String,
    pub direction: PortDirection,
    pub transport: Transport,
}

impl PortInfo {
    pub fn api(&self) -> Api {
        self.api
    }
}

impl PartialEq for PortInfo {
    fn eq(&self, other: &PortInfo) -> bool {
        self.api == other.api && self.handle == other.handle
    }
}

impl Eq for PortInfo {}

impl std::hash::Hash for PortInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.api.hash(state);
        self.handle.hash(state);
    }
}

/// An enumerated input port. Obtain from [`Observer::get_input_ports`].
///
/// [`Observer::get_input_ports`]: crate::Observer::get_input_ports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputPort(pub PortInfo);

/// An enumerated output port. Obtain from [`Observer::get_output_ports`].
///
/// [`Observer::get_output_ports`]: crate::Observer::get_output_ports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputPort(pub PortInfo);

impl std::ops::Deref for InputPort {
    type Target = PortInfo;

    fn deref(&self) -> &PortInfo {
        &self.0
    }
}

impl std::ops::Deref for OutputPort {
    type Target = PortInfo;

    fn deref(&self) -> &PortInfo {
        &self.0
    }
}

bitflags! {
    /// MIDI protocols supported by a UMP endpoint or function block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protocols: u8 {
        const MIDI1 = 1 << 1;
        const MIDI2 = 1 << 2;
    }
}

impl Default for Protocols {
    fn default() -> Self {
        Protocols::MIDI1
    }
}

/// UMP-layer addressing within an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBlock {
    pub name: String,
    pub direction: BlockDirection,
    pub first_group: u8,
    pub group_count: u8,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDirection {
    Input,
    Output,
    Bidirectional,
}

/// Metadata of a UMP endpoint as carried by UMP stream messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UmpEndpointInfo {
    pub name: String,
    pub product_instance_id: String,
    pub version: UmpVersion,
    pub protocols: Protocols,
    pub function_blocks: Vec<FunctionBlock>,
    /// Whether the function-block layout is fixed for the endpoint's
    /// lifetime.
    pub static_function_blocks: bool,
}

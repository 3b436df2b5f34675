//! Protocol constants of TWAIN 1.9.
//!
//! Derived from `twain.h`. Only the identifiers the data source actually
//! answers to are listed.

// ============================================================================
// Data Groups
// ============================================================================

pub const DG_CONTROL: u32 = 0x0001;
pub const DG_IMAGE: u32 = 0x0002;

// ============================================================================
// Data Argument Types
// ============================================================================

pub const DAT_CAPABILITY: u16 = 0x0001;
pub const DAT_EVENT: u16 = 0x0002;
pub const DAT_IDENTITY: u16 = 0x0003;
pub const DAT_PENDINGXFERS: u16 = 0x0005;
pub const DAT_SETUPMEMXFER: u16 = 0x0006;
pub const DAT_STATUS: u16 = 0x0008;
pub const DAT_USERINTERFACE: u16 = 0x0009;
pub const DAT_XFERGROUP: u16 = 0x000a;
pub const DAT_CUSTOMDSDATA: u16 = 0x000c;

pub const DAT_IMAGEINFO: u16 = 0x0101;
pub const DAT_IMAGELAYOUT: u16 = 0x0102;
pub const DAT_IMAGEMEMXFER: u16 = 0x0103;
pub const DAT_IMAGENATIVEXFER: u16 = 0x0104;
pub const DAT_PALETTE8: u16 = 0x010a;

// ============================================================================
// Messages
// ============================================================================

pub const MSG_GET: u16 = 0x0001;
pub const MSG_GETCURRENT: u16 = 0x0002;
pub const MSG_GETDEFAULT: u16 = 0x0003;
pub const MSG_SET: u16 = 0x0006;
pub const MSG_RESET: u16 = 0x0007;
pub const MSG_QUERYSUPPORT: u16 = 0x0008;

pub const MSG_XFERREADY: u16 = 0x0101;
pub const MSG_CLOSEDSREQ: u16 = 0x0102;

pub const MSG_OPENDS: u16 = 0x0401;
pub const MSG_CLOSEDS: u16 = 0x0402;

pub const MSG_DISABLEDS: u16 = 0x0501;
pub const MSG_ENABLEDS: u16 = 0x0502;
pub const MSG_ENABLEDSUIONLY: u16 = 0x0503;

pub const MSG_ENDXFER: u16 = 0x0701;

// ============================================================================
// Return Codes
// ============================================================================

pub const TWRC_SUCCESS: u16 = 0;
pub const TWRC_FAILURE: u16 = 1;
pub const TWRC_CHECKSTATUS: u16 = 2;
pub const TWRC_XFERDONE: u16 = 6;

// ============================================================================
// Condition Codes
// ============================================================================

pub const TWCC_SUCCESS: u16 = 0;
pub const TWCC_BUMMER: u16 = 1;
pub const TWCC_LOWMEMORY: u16 = 2;
pub const TWCC_NODS: u16 = 3;
pub const TWCC_OPERATIONERROR: u16 = 5;
pub const TWCC_BADCAP: u16 = 6;
pub const TWCC_BADPROTOCOL: u16 = 9;
pub const TWCC_BADVALUE: u16 = 10;
pub const TWCC_SEQERROR: u16 = 11;
pub const TWCC_CAPUNSUPPORTED: u16 = 13;
pub const TWCC_CAPBADOPERATION: u16 = 14;

// ============================================================================
// Container Types
// ============================================================================

pub const TWON_ARRAY: u16 = 3;
pub const TWON_ENUMERATION: u16 = 4;
pub const TWON_ONEVALUE: u16 = 5;
pub const TWON_RANGE: u16 = 6;

/// "Don't care" marker for 32-bit fields.
pub const TWON_DONTCARE32: u32 = 0xffff_ffff;

// ============================================================================
// Item Types
// ============================================================================

pub const TWTY_INT8: u16 = 0x0000;
pub const TWTY_INT16: u16 = 0x0001;
pub const TWTY_INT32: u16 = 0x0002;
pub const TWTY_UINT8: u16 = 0x0003;
pub const TWTY_UINT16: u16 = 0x0004;
pub const TWTY_UINT32: u16 = 0x0005;
pub const TWTY_BOOL: u16 = 0x0006;
pub const TWTY_FIX32: u16 = 0x0007;
pub const TWTY_FRAME: u16 = 0x0008;
pub const TWTY_STR32: u16 = 0x0009;
pub const TWTY_STR64: u16 = 0x000a;
pub const TWTY_STR128: u16 = 0x000b;
pub const TWTY_STR255: u16 = 0x000c;

// ============================================================================
// Capabilities
// ============================================================================

pub const CAP_XFERCOUNT: u16 = 0x0001;
pub const ICAP_COMPRESSION: u16 = 0x0100;
pub const ICAP_PIXELTYPE: u16 = 0x0101;
pub const ICAP_UNITS: u16 = 0x0102;
pub const ICAP_XFERMECH: u16 = 0x0103;

pub const CAP_SUPPORTEDCAPS: u16 = 0x1005;
pub const CAP_INDICATORS: u16 = 0x100b;
pub const CAP_UICONTROLLABLE: u16 = 0x100e;
pub const CAP_DEVICEONLINE: u16 = 0x100f;
pub const CAP_CUSTOMDSDATA: u16 = 0x1015;
pub const CAP_ENABLEDSUIONLY: u16 = 0x1019;

pub const ICAP_BRIGHTNESS: u16 = 0x1101;
pub const ICAP_CONTRAST: u16 = 0x1103;
pub const ICAP_PHYSICALWIDTH: u16 = 0x1111;
pub const ICAP_PHYSICALHEIGHT: u16 = 0x1112;
pub const ICAP_XNATIVERESOLUTION: u16 = 0x1116;
pub const ICAP_YNATIVERESOLUTION: u16 = 0x1117;
pub const ICAP_XRESOLUTION: u16 = 0x1118;
pub const ICAP_YRESOLUTION: u16 = 0x1119;
pub const ICAP_BITORDER: u16 = 0x111c;
pub const ICAP_PIXELFLAVOR: u16 = 0x111f;
pub const ICAP_PLANARCHUNKY: u16 = 0x1120;
pub const ICAP_BITDEPTH: u16 = 0x112b;

/// Base of the data-source specific capability range.
pub const CAP_CUSTOMBASE: u16 = 0x8000;
/// Scan area edges in backend units (16.16).
pub const CUSTCAP_AREA_TOP: u16 = CAP_CUSTOMBASE + 0x0101;
pub const CUSTCAP_AREA_LEFT: u16 = CAP_CUSTOMBASE + 0x0102;
pub const CUSTCAP_AREA_BOTTOM: u16 = CAP_CUSTOMBASE + 0x0103;
pub const CUSTCAP_AREA_RIGHT: u16 = CAP_CUSTOMBASE + 0x0104;

// ============================================================================
// QuerySupport flags
// ============================================================================

pub const TWQC_GET: i32 = 0x0001;
pub const TWQC_SET: i32 = 0x0002;
pub const TWQC_GETDEFAULT: i32 = 0x0004;
pub const TWQC_GETCURRENT: i32 = 0x0008;
pub const TWQC_RESET: i32 = 0x0010;

// ============================================================================
// Capability values
// ============================================================================

pub const TWCP_NONE: u16 = 0;

pub const TWPT_BW: u16 = 0;
pub const TWPT_GRAY: u16 = 1;
pub const TWPT_RGB: u16 = 2;
pub const TWPT_PALETTE: u16 = 3;

pub const TWUN_INCHES: u16 = 0;

pub const TWSX_NATIVE: u16 = 0;
pub const TWSX_MEMORY: u16 = 2;

pub const TWPC_CHUNKY: u16 = 0;
pub const TWPF_CHOCOLATE: u16 = 0;
pub const TWBO_MSBFIRST: u16 = 1;

pub const TWPA_RGB: u16 = 0;

// ============================================================================
// Protocol version
// ============================================================================

pub const TWON_PROTOCOLMAJOR: u16 = 1;
pub const TWON_PROTOCOLMINOR: u16 = 9;

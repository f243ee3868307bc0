//! Static descriptors of the supported devices.
//!
//! UUIDs, names and company identifiers have to match the firmware of each device exactly.

use uuid::Uuid;

use crate::bearer::ScanFilter;

/// A GATT characteristic the crate knows how to use.
#[derive(Debug)]
pub struct CharacteristicDescriptor {
    pub name: &'static str,
    /// Logical id, unique within its service
    pub id: &'static str,
    pub uuid: Uuid,
}

/// A GATT service and the characteristics declared for it.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    /// Logical id, unique within its device
    pub id: &'static str,
    pub uuid: Uuid,
    pub characteristics: &'static [CharacteristicDescriptor],
}

/// Everything needed to find a device and map its services.
#[derive(Debug)]
pub struct DeviceDescriptor {
    /// Advertised local name used as a scan filter
    pub name: Option<&'static str>,
    /// Manufacturer data company identifier used as a scan filter
    pub company_id: Option<u16>,
    pub services: &'static [ServiceDescriptor],
}

impl DeviceDescriptor {
    /// Scan filters for this device. A device matches if any filter matches.
    pub fn filters(&self) -> Vec<ScanFilter> {
        let mut filters = Vec::new();
        if let Some(name) = self.name {
            filters.push(ScanFilter::Name(name.to_string()));
        }
        if let Some(company_id) = self.company_id {
            filters.push(ScanFilter::CompanyId(company_id));
        }
        filters
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|s| s.uuid).collect()
    }

    pub fn service(&self, id: &str) -> Option<&'static ServiceDescriptor> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// The device families the crate can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Griptonite Motherboard
    Motherboard,
    Entralpi,
    /// Tindeq Progressor
    Progressor,
    /// PitchSix Force Board
    ForceBoard,
    /// Weiheng WH-C06 crane scale. Only talks through advertisements.
    WhC06,
    /// MAT Muscle Meter
    MuscleMeter,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 6] = [
        DeviceKind::Motherboard,
        DeviceKind::Entralpi,
        DeviceKind::Progressor,
        DeviceKind::ForceBoard,
        DeviceKind::WhC06,
        DeviceKind::MuscleMeter,
    ];

    pub fn descriptor(&self) -> &'static DeviceDescriptor {
        match self {
            DeviceKind::Motherboard => &MOTHERBOARD,
            DeviceKind::Entralpi => &ENTRALPI,
            DeviceKind::Progressor => &PROGRESSOR,
            DeviceKind::ForceBoard => &FORCE_BOARD,
            DeviceKind::WhC06 => &WH_C06,
            DeviceKind::MuscleMeter => &MUSCLE_METER,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Motherboard => "Motherboard",
            DeviceKind::Entralpi => "Entralpi",
            DeviceKind::Progressor => "Progressor",
            DeviceKind::ForceBoard => "Force Board",
            DeviceKind::WhC06 => "WH-C06",
            DeviceKind::MuscleMeter => "Muscle Meter",
        }
    }

    /// Look a device up by label or advertised name, ignoring case.
    pub fn from_name(name: &str) -> Option<DeviceKind> {
        Self::ALL.into_iter().find(|kind| {
            kind.label().eq_ignore_ascii_case(name)
                || kind
                    .descriptor()
                    .name
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    /// Whether measurements arrive in advertisements rather than over a GATT connection.
    pub fn is_advertising_only(&self) -> bool {
        matches!(self, DeviceKind::WhC06)
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Expand a 16 bit SIG assigned number into a full UUID.
const fn sig(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

const DEVICE_INFORMATION: u16 = 0x180a;
const BATTERY_SERVICE: u16 = 0x180f;

/// Logical ids shared by several devices
pub mod ids {
    pub const DEVICE: &str = "device";
    pub const BATTERY: &str = "battery";
    pub const LEVEL: &str = "level";
    pub const UART: &str = "uart";
    pub const PROGRESSOR: &str = "progressor";
    pub const TX: &str = "tx";
    pub const RX: &str = "rx";
    pub const FIRMWARE: &str = "firmware";
    pub const HARDWARE: &str = "hardware";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const SERIAL: &str = "serial";
}

pub static MOTHERBOARD: DeviceDescriptor = DeviceDescriptor {
    name: Some("Motherboard"),
    company_id: Some(0x2a29),
    services: &[
        ServiceDescriptor {
            name: "Device Information",
            id: ids::DEVICE,
            uuid: sig(DEVICE_INFORMATION),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Firmware Revision",
                    id: ids::FIRMWARE,
                    uuid: sig(0x2a26),
                },
                CharacteristicDescriptor {
                    name: "Hardware Revision",
                    id: ids::HARDWARE,
                    uuid: sig(0x2a27),
                },
                CharacteristicDescriptor {
                    name: "Manufacturer Name",
                    id: ids::MANUFACTURER,
                    uuid: sig(0x2a29),
                },
            ],
        },
        ServiceDescriptor {
            name: "Battery Service",
            id: ids::BATTERY,
            uuid: sig(BATTERY_SERVICE),
            characteristics: &[CharacteristicDescriptor {
                name: "Battery Level",
                id: ids::LEVEL,
                uuid: sig(0x2a19),
            }],
        },
        ServiceDescriptor {
            name: "Unknown Service",
            id: "unknown",
            uuid: Uuid::from_u128(0x10ababcd_15e1_28ff_de13_725bea03b127),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Unknown 01",
                    id: "01",
                    uuid: Uuid::from_u128(0x10ab1524_15e1_28ff_de13_725bea03b127),
                },
                CharacteristicDescriptor {
                    name: "Unknown 02",
                    id: "02",
                    uuid: Uuid::from_u128(0x10ab1525_15e1_28ff_de13_725bea03b127),
                },
            ],
        },
        ServiceDescriptor {
            name: "UART Nordic Service",
            id: ids::UART,
            uuid: Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "TX",
                    id: ids::TX,
                    uuid: Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
                },
                CharacteristicDescriptor {
                    name: "RX",
                    id: ids::RX,
                    uuid: Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
                },
            ],
        },
    ],
};

pub static ENTRALPI: DeviceDescriptor = DeviceDescriptor {
    name: Some("ENTRALPI"),
    company_id: None,
    services: &[
        ServiceDescriptor {
            name: "Device Information",
            id: ids::DEVICE,
            uuid: sig(DEVICE_INFORMATION),
            characteristics: &[],
        },
        ServiceDescriptor {
            name: "Battery Service",
            id: ids::BATTERY,
            uuid: sig(BATTERY_SERVICE),
            characteristics: &[],
        },
        ServiceDescriptor {
            name: "Generic Attribute",
            id: "attribute",
            uuid: sig(0x1801),
            characteristics: &[],
        },
        ServiceDescriptor {
            name: "UART ISSC Transparent Service",
            id: ids::UART,
            uuid: sig(0xfff0),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "TX",
                    id: ids::TX,
                    uuid: sig(0xfff5),
                },
                CharacteristicDescriptor {
                    name: "RX",
                    id: ids::RX,
                    uuid: sig(0xfff4),
                },
            ],
        },
        ServiceDescriptor {
            name: "Weight Scale",
            id: "weight",
            uuid: sig(0x181d),
            characteristics: &[],
        },
        ServiceDescriptor {
            name: "Generic Access",
            id: "access",
            uuid: sig(0x1800),
            characteristics: &[],
        },
    ],
};

pub static PROGRESSOR: DeviceDescriptor = DeviceDescriptor {
    name: Some("Progressor"),
    company_id: None,
    services: &[
        ServiceDescriptor {
            name: "Progressor Service",
            id: ids::PROGRESSOR,
            uuid: Uuid::from_u128(0x7e4e1701_1ea6_40c9_9dcc_13d34ffead57),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Notify",
                    id: ids::RX,
                    uuid: Uuid::from_u128(0x7e4e1702_1ea6_40c9_9dcc_13d34ffead57),
                },
                CharacteristicDescriptor {
                    name: "Write",
                    id: ids::TX,
                    uuid: Uuid::from_u128(0x7e4e1703_1ea6_40c9_9dcc_13d34ffead57),
                },
            ],
        },
        ServiceDescriptor {
            name: "Nordic Device Firmware Update (DFU) Service",
            id: "dfu",
            uuid: sig(0xfe59),
            characteristics: &[],
        },
    ],
};

pub static FORCE_BOARD: DeviceDescriptor = DeviceDescriptor {
    name: Some("Force Board"),
    company_id: None,
    services: &[
        ServiceDescriptor {
            name: "Battery Service",
            id: ids::BATTERY,
            uuid: sig(BATTERY_SERVICE),
            characteristics: &[CharacteristicDescriptor {
                name: "Battery Level",
                id: ids::LEVEL,
                uuid: sig(0x2a19),
            }],
        },
        ServiceDescriptor {
            name: "Device Information",
            id: ids::DEVICE,
            uuid: sig(DEVICE_INFORMATION),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Serial Number String",
                    id: ids::SERIAL,
                    uuid: sig(0x2a25),
                },
                CharacteristicDescriptor {
                    name: "Firmware Revision String",
                    id: ids::FIRMWARE,
                    uuid: sig(0x2a26),
                },
                CharacteristicDescriptor {
                    name: "Manufacturer Name String",
                    id: ids::MANUFACTURER,
                    uuid: sig(0x2a29),
                },
            ],
        },
        ServiceDescriptor {
            name: "Nordic Device Firmware Update (DFU) Service",
            id: "dfu",
            uuid: sig(0xfe59),
            characteristics: &[CharacteristicDescriptor {
                name: "Buttonless DFU",
                id: "dfu",
                uuid: Uuid::from_u128(0x8ec90003_f315_4f60_9fb8_838830daea50),
            }],
        },
        // The firmware names none of these. The only notifying characteristic of the force
        // service is bound as `rx` and the serial one as `tx`.
        ServiceDescriptor {
            name: "Force Service",
            id: "force",
            uuid: Uuid::from_u128(0x9a88d67f_8df2_4afe_9e0d_c2bbbe773dd0),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Write",
                    id: "d680",
                    uuid: Uuid::from_u128(0x9a88d680_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Read + Indicate",
                    id: "d681",
                    uuid: Uuid::from_u128(0x9a88d681_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Read + Notify",
                    id: ids::RX,
                    uuid: Uuid::from_u128(0x9a88d682_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Write",
                    id: "d683",
                    uuid: Uuid::from_u128(0x9a88d683_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Read",
                    id: "d685",
                    uuid: Uuid::from_u128(0x9a88d685_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Write",
                    id: "d686",
                    uuid: Uuid::from_u128(0x9a88d686_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Read + Write",
                    id: "d687",
                    uuid: Uuid::from_u128(0x9a88d687_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Serial",
                    id: ids::TX,
                    uuid: Uuid::from_u128(0x9a88d688_8df2_4afe_9e0d_c2bbbe773dd0),
                },
                CharacteristicDescriptor {
                    name: "Read + Write",
                    id: "d689",
                    uuid: Uuid::from_u128(0x9a88d689_8df2_4afe_9e0d_c2bbbe773dd0),
                },
            ],
        },
        ServiceDescriptor {
            name: "Indicate Service",
            id: "f3641400",
            uuid: Uuid::from_u128(0xf3641400_00b0_4240_ba50_05ca45bf8abc),
            characteristics: &[CharacteristicDescriptor {
                name: "Read + Indicate",
                id: "f3641401",
                uuid: Uuid::from_u128(0xf3641401_00b0_4240_ba50_05ca45bf8abc),
            }],
        },
        ServiceDescriptor {
            name: "cf194c6f",
            id: "cf194c6f",
            uuid: Uuid::from_u128(0xcf194c6f_d0c1_47b2_aeff_dc610f09bd18),
            characteristics: &[CharacteristicDescriptor {
                name: "Read",
                id: "cf194c70",
                uuid: Uuid::from_u128(0xcf194c70_d0c1_47b2_aeff_dc610f09bd18),
            }],
        },
        ServiceDescriptor {
            name: "3a90328c",
            id: "3a90328c",
            uuid: Uuid::from_u128(0x3a90328c_c266_4c76_b05a_6af6104a0b13),
            characteristics: &[CharacteristicDescriptor {
                name: "Read",
                id: "3a90328d",
                uuid: Uuid::from_u128(0x3a90328d_c266_4c76_b05a_6af6104a0b13),
            }],
        },
        ServiceDescriptor {
            name: "467a8516",
            id: "467a8516",
            uuid: Uuid::from_u128(0x467a8516_6e39_11eb_9439_0242ac130002),
            characteristics: &[
                CharacteristicDescriptor {
                    name: "Read + Write",
                    id: "467a8517",
                    uuid: Uuid::from_u128(0x467a8517_6e39_11eb_9439_0242ac130002),
                },
                CharacteristicDescriptor {
                    name: "Read + Write",
                    id: "467a8518",
                    uuid: Uuid::from_u128(0x467a8518_6e39_11eb_9439_0242ac130002),
                },
            ],
        },
    ],
};

pub static WH_C06: DeviceDescriptor = DeviceDescriptor {
    name: None,
    // Also assigned to TomTom International BV
    company_id: Some(0x0100),
    services: &[],
};

pub static MUSCLE_METER: DeviceDescriptor = DeviceDescriptor {
    name: Some("MAT"),
    company_id: None,
    services: &[],
};

#[test]
fn test_sig_uuid() {
    assert_eq!(
        sig(0x2a19).to_string(),
        "00002a19-0000-1000-8000-00805f9b34fb"
    );
    assert_eq!(
        MOTHERBOARD.service(ids::UART).unwrap().uuid.to_string(),
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
    );
}

#[test]
fn test_filters() {
    assert_eq!(
        MOTHERBOARD.filters(),
        vec![
            ScanFilter::Name("Motherboard".to_string()),
            ScanFilter::CompanyId(0x2a29)
        ]
    );
    assert_eq!(WH_C06.filters(), vec![ScanFilter::CompanyId(0x0100)]);
    assert_eq!(
        ENTRALPI.filters(),
        vec![ScanFilter::Name("ENTRALPI".to_string())]
    );
}

#[test]
fn test_logical_ids_unique() {
    for kind in DeviceKind::ALL {
        let services = kind.descriptor().services;
        for (i, s) in services.iter().enumerate() {
            assert!(services[i + 1..].iter().all(|o| o.id != s.id), "{kind}: {}", s.id);
            for (j, c) in s.characteristics.iter().enumerate() {
                assert!(s.characteristics[j + 1..].iter().all(|o| o.id != c.id));
            }
        }
    }
}

#[test]
fn test_force_board_services() {
    let uuids: Vec<String> = FORCE_BOARD
        .service_uuids()
        .iter()
        .map(|u| u.to_string()[..8].to_string())
        .collect();
    assert_eq!(
        uuids,
        [
            "0000180f", "0000180a", "0000fe59", "9a88d67f", "f3641400", "cf194c6f", "3a90328c",
            "467a8516"
        ]
    );

    let force = FORCE_BOARD.service("force").unwrap();
    assert_eq!(force.characteristics.len(), 9);
    let rx = force.characteristics.iter().find(|c| c.id == ids::RX).unwrap();
    assert_eq!(rx.uuid, Uuid::from_u128(0x9a88d682_8df2_4afe_9e0d_c2bbbe773dd0));
}

#[test]
fn test_from_name() {
    assert_eq!(DeviceKind::from_name("entralpi"), Some(DeviceKind::Entralpi));
    assert_eq!(DeviceKind::from_name("WH-C06"), Some(DeviceKind::WhC06));
    assert_eq!(DeviceKind::from_name("MAT"), Some(DeviceKind::MuscleMeter));
    assert_eq!(DeviceKind::from_name("Tindeq"), None);
}

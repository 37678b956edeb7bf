use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backing class of a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Rom,
    Ram,
    /// Device registers: no backing store. Program loads read the testcase
    /// input, program stores are dropped, the debugger may do neither.
    Mmio,
}

impl RegionKind {
    pub fn is_backed(self) -> bool {
        !matches!(self, RegionKind::Mmio)
    }
}

/// Layout entry as written in fixture files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub base_addr: u32,
    pub size: u32,
    pub memory_type: RegionKind,
    #[serde(default)]
    pub fill: u8,
}

impl RegionSpec {
    pub fn new(base_addr: u32, size: u32, memory_type: RegionKind) -> Self {
        Self {
            base_addr,
            size,
            memory_type,
            fill: 0,
        }
    }

    fn end(&self) -> u64 {
        u64::from(self.base_addr) + u64::from(self.size)
    }

    fn contains(&self, address: u64, len: u64) -> bool {
        address >= u64::from(self.base_addr) && address.saturating_add(len) <= self.end()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryFault {
    #[error("address {address:#010x} is not mapped")]
    Unmapped { address: u64 },
    #[error("region at {address:#010x} is mmio")]
    Mmio { address: u64 },
    #[error("{len} bytes at {address:#010x} cross a region boundary")]
    CrossesRegion { address: u64, len: usize },
    #[error("region at {address:#010x} is read-only")]
    ReadOnly { address: u64 },
}

impl MemoryFault {
    pub fn address(&self) -> u64 {
        match self {
            MemoryFault::Unmapped { address }
            | MemoryFault::Mmio { address }
            | MemoryFault::CrossesRegion { address, .. }
            | MemoryFault::ReadOnly { address } => *address,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("region at {base:#010x} is empty")]
    Empty { base: u32 },
    #[error("region at {base:#010x} runs past the 32-bit address space")]
    Overflow { base: u32 },
    #[error("regions at {first:#010x} and {second:#010x} overlap")]
    Overlap { first: u32, second: u32 },
    #[error("{len} image bytes at {address:#010x} do not fit one backed region")]
    Image { address: u32, len: usize },
}

#[derive(Debug, Clone)]
struct Region {
    spec: RegionSpec,
    bytes: Vec<u8>,
}

impl Region {
    fn offset(&self, address: u64) -> usize {
        (address - u64::from(self.spec.base_addr)) as usize
    }
}

/// What a program load or store touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Backed(RegionKind),
    Device,
}

/// The target's address space.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    regions: Vec<Region>,
}

impl MemoryMap {
    pub fn new(specs: &[RegionSpec]) -> Result<Self, LayoutError> {
        let mut sorted = specs.to_vec();
        sorted.sort_by_key(|spec| spec.base_addr);
        for spec in &sorted {
            if spec.size == 0 {
                return Err(LayoutError::Empty {
                    base: spec.base_addr,
                });
            }
            if spec.end() > u64::from(u32::MAX) + 1 {
                return Err(LayoutError::Overflow {
                    base: spec.base_addr,
                });
            }
        }
        for pair in sorted.windows(2) {
            if pair[0].end() > u64::from(pair[1].base_addr) {
                return Err(LayoutError::Overlap {
                    first: pair[0].base_addr,
                    second: pair[1].base_addr,
                });
            }
        }
        let regions = sorted
            .into_iter()
            .map(|spec| {
                let bytes = if spec.memory_type.is_backed() {
                    vec![spec.fill; spec.size as usize]
                } else {
                    Vec::new()
                };
                Region { spec, bytes }
            })
            .collect();
        Ok(Self { regions })
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionSpec> {
        self.regions.iter().map(|region| &region.spec)
    }

    pub fn classify(&self, address: u64) -> Option<RegionKind> {
        self.find(address, 1).ok().map(|region| region.spec.memory_type)
    }

    fn locate(&self, address: u64, len: u64) -> Result<usize, MemoryFault> {
        let len = len.max(1);
        let index = self
            .regions
            .iter()
            .position(|region| region.spec.contains(address, 1))
            .ok_or(MemoryFault::Unmapped { address })?;
        if !self.regions[index].spec.contains(address, len) {
            return Err(MemoryFault::CrossesRegion {
                address,
                len: len as usize,
            });
        }
        Ok(index)
    }

    fn find(&self, address: u64, len: u64) -> Result<&Region, MemoryFault> {
        let index = self.locate(address, len)?;
        Ok(&self.regions[index])
    }

    fn find_mut(&mut self, address: u64, len: u64) -> Result<&mut Region, MemoryFault> {
        let index = self.locate(address, len)?;
        Ok(&mut self.regions[index])
    }

    /// Place initial image bytes; ROM accepts them too.
    pub fn load_image(&mut self, address: u32, bytes: &[u8]) -> Result<(), LayoutError> {
        let err = LayoutError::Image {
            address,
            len: bytes.len(),
        };
        let region = self
            .find_mut(u64::from(address), bytes.len() as u64)
            .map_err(|_| err.clone())?;
        if !region.spec.memory_type.is_backed() {
            return Err(err);
        }
        let offset = region.offset(u64::from(address));
        region.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Debugger read: the whole range must sit in one backed region.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, MemoryFault> {
        let region = self.find(address, len as u64)?;
        if !region.spec.memory_type.is_backed() {
            return Err(MemoryFault::Mmio { address });
        }
        let offset = region.offset(address);
        Ok(region.bytes[offset..offset + len].to_vec())
    }

    /// Debugger write: ROM and RAM both accept it, MMIO never does. Nothing is
    /// written unless the whole range is valid.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryFault> {
        let region = self.find_mut(address, data.len() as u64)?;
        if !region.spec.memory_type.is_backed() {
            return Err(MemoryFault::Mmio { address });
        }
        let offset = region.offset(address);
        region.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Where a 4-byte program access at `address` lands.
    pub fn word_target(&self, address: u32) -> Result<Target, MemoryFault> {
        let region = self.find(u64::from(address), 4)?;
        Ok(match region.spec.memory_type {
            RegionKind::Mmio => Target::Device,
            kind => Target::Backed(kind),
        })
    }

    pub fn read_word(&self, address: u32) -> Result<u32, MemoryFault> {
        let bytes = self.read(u64::from(address), 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Program store: ROM refuses it.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), MemoryFault> {
        if self.word_target(address)? == Target::Backed(RegionKind::Rom) {
            return Err(MemoryFault::ReadOnly {
                address: u64::from(address),
            });
        }
        self.write(u64::from(address), &value.to_le_bytes())
    }
}

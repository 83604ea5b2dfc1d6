use std::hash::Hash;
use ash::vk;
use smallvec::SmallVec;

/// What a queue is used for. Several roles may share one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

impl QueueRole {
    pub const ALL: [QueueRole; 3] = [QueueRole::Graphics, QueueRole::Present, QueueRole::Transfer];
}

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        // Graphics and compute queues implicitly accept transfer commands
        self.properties.queue_flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
    }

    /// A family that only does transfers, the kind backed by a DMA engine
    pub fn is_dedicated_transfer(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !self.supports_graphics()
            && !self.supports_compute()
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// Queue family chosen for each role
#[derive(Debug, Clone)]
pub struct QueueFamilySelection {
    pub graphics: QueueFamily,
    pub present: QueueFamily,
    pub transfer: QueueFamily,
}

impl QueueFamilySelection {
    /// Picks families for every role from a device's queue family list.
    ///
    /// Graphics prefers a family that can also present. Transfer prefers a dedicated transfer
    /// family when `prefer_dedicated_transfer` is set and falls back to the graphics family.
    /// With `require_present == false` the present role aliases graphics.
    pub fn select(
        families: &[QueueFamily],
        require_present: bool,
        prefer_dedicated_transfer: bool,
    ) -> Option<Self> {
        let graphics = families
            .iter()
            .find(|f| f.supports_graphics() && (!require_present || f.supports_present()))
            .or_else(|| families.iter().find(|f| f.supports_graphics()))?
            .clone();

        let present = if require_present {
            if graphics.supports_present() {
                graphics.clone()
            } else {
                families.iter().find(|f| f.supports_present())?.clone()
            }
        } else {
            graphics.clone()
        };

        let transfer = if prefer_dedicated_transfer {
            families
                .iter()
                .find(|f| f.is_dedicated_transfer())
                .or_else(|| {
                    families
                        .iter()
                        .find(|f| f.supports_transfer() && !f.supports_graphics())
                })
                .cloned()
                .unwrap_or_else(|| graphics.clone())
        } else {
            graphics.clone()
        };

        Some(Self {
            graphics,
            present,
            transfer,
        })
    }

    pub fn family(&self, role: QueueRole) -> &QueueFamily {
        match role {
            QueueRole::Graphics => &self.graphics,
            QueueRole::Present => &self.present,
            QueueRole::Transfer => &self.transfer,
        }
    }

    /// Distinct family indices, in role order
    pub fn unique_indices(&self) -> SmallVec<[u32; 3]> {
        let mut indices = SmallVec::new();
        for role in QueueRole::ALL {
            let index = self.family(role).index;
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        indices
    }
}

use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::descriptor::layout::DescriptorSetLayout;

/// Borrowed descriptor data. Copied into the instance when a write is recorded.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorInfo<'a> {
    Buffers(&'a [vk::DescriptorBufferInfo]),
    Images(&'a [vk::DescriptorImageInfo]),
    TexelViews(&'a [vk::BufferView]),
}

impl DescriptorInfo<'_> {
    /// Whether this kind of data is what a descriptor of type `ty` is written from.
    pub fn fits(&self, ty: vk::DescriptorType) -> bool {
        match self {
            DescriptorInfo::Buffers(_) => matches!(
                ty,
                vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::STORAGE_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                    | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            ),
            DescriptorInfo::Images(_) => matches!(
                ty,
                vk::DescriptorType::SAMPLER
                    | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                    | vk::DescriptorType::SAMPLED_IMAGE
                    | vk::DescriptorType::STORAGE_IMAGE
                    | vk::DescriptorType::INPUT_ATTACHMENT
            ),
            DescriptorInfo::TexelViews(_) => matches!(
                ty,
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER
            ),
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Empty,
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
    TexelViews(Vec<vk::BufferView>),
}

impl From<DescriptorInfo<'_>> for Payload {
    fn from(info: DescriptorInfo<'_>) -> Self {
        match info {
            DescriptorInfo::Buffers(infos) => Payload::Buffers(infos.to_vec()),
            DescriptorInfo::Images(infos) => Payload::Images(infos.to_vec()),
            DescriptorInfo::TexelViews(views) => Payload::TexelViews(views.to_vec()),
        }
    }
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Buffers(v) => v.len(),
            Payload::Images(v) => v.len(),
            Payload::TexelViews(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    binding: u32,
    array_element: u32,
    descriptor_type: vk::DescriptorType,
    payload: Payload,
}

/// The contents of one descriptor set: the writes to apply once a set handle is assigned.
///
/// Writes are kept after they are applied so the same contents can be written into the
/// fresh set handed out after every allocator reset.
pub struct DescriptorSetInstance {
    layout: Option<Arc<DescriptorSetLayout>>,
    set: vk::DescriptorSet,
    writes: Vec<PendingWrite>,
    ctx: Arc<DeviceContext>,
}

impl DescriptorSetInstance {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            layout: None,
            set: vk::DescriptorSet::null(),
            writes: Vec::new(),
            ctx,
        }
    }

    /// Seeds one empty write per binding of `layout`.
    pub fn set_descriptor_set_layout(&mut self, layout: Arc<DescriptorSetLayout>) {
        self.writes = layout
            .bindings()
            .iter()
            .map(|b| PendingWrite {
                binding: b.binding,
                array_element: 0,
                descriptor_type: b.descriptor_type,
                payload: Payload::Empty,
            })
            .collect();
        self.layout = Some(layout);
        self.set = vk::DescriptorSet::null();
    }

    /// Records an additional write starting at `array_element` of `binding`.
    pub fn add_descriptor_write(&mut self, binding: u32, array_element: u32, info: DescriptorInfo<'_>) {
        let descriptor_type = self.checked_type(binding, array_element, &info);
        self.writes.push(PendingWrite {
            binding,
            array_element,
            descriptor_type,
            payload: info.into(),
        });
    }

    /// Replaces the data of the first write targeting `binding`.
    pub fn update_descriptor_write(&mut self, binding: u32, info: DescriptorInfo<'_>) {
        let index = self
            .writes
            .iter()
            .position(|w| w.binding == binding)
            .unwrap_or_else(|| panic!("no write for binding {}", binding));
        let array_element = self.writes[index].array_element;
        self.checked_type(binding, array_element, &info);
        self.writes[index].payload = info.into();
    }

    /// Points every write at `set` and applies them in one update.
    pub fn set_internal_descriptor_set(&mut self, set: vk::DescriptorSet) {
        self.set = set;

        let writes = self
            .writes
            .iter()
            .filter(|w| !matches!(w.payload, Payload::Empty))
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(w.descriptor_type);
                match &w.payload {
                    Payload::Buffers(infos) => write.buffer_info(infos),
                    Payload::Images(infos) => write.image_info(infos),
                    Payload::TexelViews(views) => write.texel_buffer_view(views),
                    Payload::Empty => write,
                }
            })
            .collect::<Vec<_>>();

        if writes.is_empty() {
            log::trace!("Descriptor set {:?} assigned with no writes", set);
            return;
        }
        unsafe { self.ctx.device().update_descriptor_sets(&writes) };
    }

    pub fn layout(&self) -> Option<&Arc<DescriptorSetLayout>> {
        self.layout.as_ref()
    }

    pub fn layout_handle(&self) -> vk::DescriptorSetLayout {
        self.layout
            .as_ref()
            .map(|l| l.handle())
            .unwrap_or_else(vk::DescriptorSetLayout::null)
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn checked_type(&self, binding: u32, array_element: u32, info: &DescriptorInfo<'_>) -> vk::DescriptorType {
        let Some(layout) = self.layout.as_ref() else {
            panic!("descriptor write before a layout was set");
        };
        let declared = layout
            .binding(binding)
            .unwrap_or_else(|| panic!("binding {} is not part of the layout", binding));
        assert!(
            info.fits(declared.descriptor_type),
            "binding {} is {:?}, which cannot be written from {:?}",
            binding,
            declared.descriptor_type,
            info
        );
        let len = Payload::from(*info).len() as u32;
        assert!(
            array_element + len <= declared.descriptor_count,
            "binding {} holds {} descriptors, write covers {}..{}",
            binding,
            declared.descriptor_count,
            array_element,
            array_element + len
        );
        declared.descriptor_type
    }
}

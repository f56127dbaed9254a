//! Per-category handle tables.
//!
//! Every API object category gets its own `HandleId -> entry` map. The maps are
//! generated once by [`object_categories!`] and selected at compile time by a
//! category marker type, so a single `insert`/`remove` body serves all of them.
//! What is stored per entry is chosen by an [`EntryFamily`]: capture stores
//! wrappers, replay stores id-translation records.

use std::collections::hash_map::{Entry, HashMap};

use tracing::debug;

use crate::HandleId;

/// Selects the entry type stored for each category.
pub trait EntryFamily {
    type Entry<C: Category>;
}

/// Compile-time tag naming one object category.
pub trait Category: Sized + Send + Sync + 'static {
    const KIND: ObjectKind;

    fn table<F: EntryFamily>(state: &StateTable<F>) -> &IdTable<F::Entry<Self>>;

    fn table_mut<F: EntryFamily>(state: &mut StateTable<F>) -> &mut IdTable<F::Entry<Self>>;
}

/// One category's map. Insert never overwrites.
#[derive(Debug, Clone)]
pub struct IdTable<V> {
    entries: HashMap<HandleId, V>,
}

impl<V> Default for IdTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IdTable<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Stores `value` unless `id` is already present. Returns whether it was stored.
    pub fn insert(&mut self, id: HandleId, value: V) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Removes and hands back the entry for `id`.
    pub fn remove(&mut self, id: HandleId) -> Option<V> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: HandleId) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

macro_rules! object_categories {
    ($($marker:ident => $field:ident),* $(,)?) => {
        /// Runtime name of an object category.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ObjectKind {
            $($marker,)*
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$marker,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(ObjectKind::$marker => stringify!($marker),)*
                }
            }
        }

        /// Category marker types used to select a table at compile time.
        pub mod category {
            $(
                #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
                pub struct $marker;
            )*
        }

        /// Aggregate of one [`IdTable`] per object category.
        ///
        /// Not internally synchronized: callers serialize mutation of a category.
        pub struct StateTable<F: EntryFamily> {
            $($field: IdTable<F::Entry<category::$marker>>,)*
        }

        impl<F: EntryFamily> StateTable<F> {
            pub fn new() -> Self {
                Self {
                    $($field: IdTable::new(),)*
                }
            }

            /// Number of live entries in the category named by `kind`.
            pub fn len_of(&self, kind: ObjectKind) -> usize {
                match kind {
                    $(ObjectKind::$marker => self.$field.len(),)*
                }
            }

            /// Number of live entries across every category.
            pub fn total_len(&self) -> usize {
                0 $(+ self.$field.len())*
            }
        }

        $(
            impl Category for category::$marker {
                const KIND: ObjectKind = ObjectKind::$marker;

                fn table<F: EntryFamily>(state: &StateTable<F>) -> &IdTable<F::Entry<Self>> {
                    &state.$field
                }

                fn table_mut<F: EntryFamily>(
                    state: &mut StateTable<F>,
                ) -> &mut IdTable<F::Entry<Self>> {
                    &mut state.$field
                }
            }
        )*
    };
}

object_categories! {
    Instance => instance,
    PhysicalDevice => physical_device,
    Device => device,
    Queue => queue,
    Semaphore => semaphore,
    CommandBuffer => command_buffer,
    Fence => fence,
    DeviceMemory => device_memory,
    Buffer => buffer,
    Image => image,
    Event => event,
    QueryPool => query_pool,
    BufferView => buffer_view,
    ImageView => image_view,
    ShaderModule => shader_module,
    PipelineCache => pipeline_cache,
    PipelineLayout => pipeline_layout,
    RenderPass => render_pass,
    Pipeline => pipeline,
    DescriptorSetLayout => descriptor_set_layout,
    Sampler => sampler,
    DescriptorPool => descriptor_pool,
    DescriptorSet => descriptor_set,
    Framebuffer => framebuffer,
    CommandPool => command_pool,
    SamplerYcbcrConversion => sampler_ycbcr_conversion,
    DescriptorUpdateTemplate => descriptor_update_template,
    SurfaceKhr => surface_khr,
    SwapchainKhr => swapchain_khr,
    DisplayKhr => display_khr,
    DisplayModeKhr => display_mode_khr,
    DebugReportCallbackExt => debug_report_callback_ext,
    ObjectTableNvx => object_table_nvx,
    IndirectCommandsLayoutNvx => indirect_commands_layout_nvx,
    DebugUtilsMessengerExt => debug_utils_messenger_ext,
    ValidationCacheExt => validation_cache_ext,
    AccelerationStructureNv => acceleration_structure_nv,
}

impl<F: EntryFamily> Default for StateTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: EntryFamily> std::fmt::Debug for StateTable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in ObjectKind::ALL {
            let len = self.len_of(*kind);
            if len > 0 {
                map.entry(&kind.name(), &len);
            }
        }
        map.finish()
    }
}

impl<F: EntryFamily> StateTable<F> {
    /// Stores `entry` under `id` in category `C` unless that id is already live there.
    pub fn insert<C: Category>(&mut self, id: HandleId, entry: F::Entry<C>) -> bool {
        let inserted = C::table_mut(self).insert(id, entry);
        if !inserted {
            debug!(category = C::KIND.name(), %id, "handle id already present, insert ignored");
        }
        inserted
    }

    /// Removes the entry for `id` in category `C`, transferring it to the caller.
    pub fn remove<C: Category>(&mut self, id: HandleId) -> Option<F::Entry<C>> {
        C::table_mut(self).remove(id)
    }

    pub fn get<C: Category>(&self, id: HandleId) -> Option<&F::Entry<C>> {
        C::table(self).get(id)
    }

    pub fn contains<C: Category>(&self, id: HandleId) -> bool {
        C::table(self).contains(id)
    }

    pub fn len<C: Category>(&self) -> usize {
        C::table(self).len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }
}

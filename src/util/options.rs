use crate::util::constants::*;
use std::default::Default;
use std::str::FromStr;
use strum_macros::EnumString;

/// How the remembered sets are kept up to date between pauses.
#[derive(Copy, Clone, EnumString, Debug, PartialEq, Eq)]
pub enum UpdateRemsetStrategy {
    /// A dedicated background thread loops over the barrier buffers.
    Thread,
    /// A task on the GC scheduler that re-submits itself after every batch.
    TaskQueue,
}

pub const DEFAULT_HEAP_SIZE: usize = 64 << LOG_BYTES_IN_MBYTE;
pub const DEFAULT_REGION_SIZE: usize = 256 << LOG_BYTES_IN_KBYTE;
/// The hotness counter is three bits wide.
pub const MAX_HOT_CARD_THRESHOLD: u8 = 7;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_valid_region_size(size: &usize) -> bool {
    size.is_power_of_two() && *size >= 4 * BYTES_IN_CARD
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake-case name. Returns false if the value cannot be
            /// parsed or is rejected by the option's validator, in which case the old value is kept.
            pub fn set_from_str(&mut self, s: &str, val: &str)->bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = <$type>::from_str(val) {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            /// Create options from defaults only, ignoring the environment.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::without_env();

                // If we have env vars that start with REGIONGC_ and match any option (such as REGIONGC_THREADS),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "REGIONGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Number of GC worker threads. With zero workers all parallel work runs on the pause thread.
    threads:                             usize                [always_valid] = num_cpus::get(),
    // Size of the reserved heap in bytes. Rounded down to whole regions.
    heap_size:                           usize                [|v: &usize| *v > 0] = DEFAULT_HEAP_SIZE,
    // Size of one region in bytes.
    region_size:                         usize                [is_valid_region_size] = DEFAULT_REGION_SIZE,
    // Upper bound of eden as a percentage of all regions.
    young_percentage:                    usize                [|v: &usize| *v > 0 && *v < 100] = 25,
    // Run concurrent marking cycles (otherwise old regions are only reclaimed by full collections).
    concurrent_marking:                  bool                 [always_valid] = true,
    // Build remembered sets concurrently. If false, cards are only processed during pauses.
    concurrent_update_remset:            bool                 [always_valid] = true,
    // Which execution context runs the concurrent remembered-set update.
    update_remset_strategy:              UpdateRemsetStrategy [always_valid] = UpdateRemsetStrategy::Thread,
    // A background pass that processed fewer cards than this goes to sleep.
    min_concurrent_cards_to_process:     usize                [always_valid] = 2,
    // Hot cards are processed on every n-th background pass.
    hot_cards_processing_frequency:      usize                [|v: &usize| *v > 0] = 2,
    // Hotness at which a card is moved to the hot set.
    hot_card_threshold:                  u8                   [|v: &u8| *v > 0 && *v <= MAX_HOT_CARD_THRESHOLD] = MAX_HOT_CARD_THRESHOLD,
    // Capacity of each mutator's post-barrier ring buffer.
    post_barrier_buffer_size:            usize                [|v: &usize| *v > 0] = 1024,
    // Old regions with less garbage (in percent of the region) are not mixed-collection candidates.
    region_garbage_rate_threshold:       usize                [is_percentage] = 0,
    // Eden regions with at least this percentage of live bytes are promoted in place.
    promotion_region_alive_rate:         usize                [is_percentage] = 70,
    // A full collection compacts regions whose fragmentation exceeds this percentage.
    full_gc_region_fragmentation_rate:   usize                [is_percentage] = 5,
    // Fixed number of old regions added to a mixed collection without a pause-time goal.
    tenured_regions_at_mixed_collection: usize                [always_valid] = 2,
    // Budget collections against max_gc_pause_millis within gc_pause_interval_millis.
    enable_pause_time_goal:              bool                 [always_valid] = false,
    max_gc_pause_millis:                 u64                  [|v: &u64| *v > 0] = 10,
    gc_pause_interval_millis:            u64                  [|v: &u64| *v > 0] = 20,
    // Occupancy (percent of the heap) after a young pause that starts concurrent marking.
    marking_occupancy_threshold:         usize                [is_percentage] = 45,
    // Evacuate young collections by copying on discovery instead of marking first.
    single_pass_compaction:              bool                 [always_valid] = true,
    parallel_marking:                    bool                 [always_valid] = true,
    parallel_compacting:                 bool                 [always_valid] = true,
    parallel_ref_updating:               bool                 [always_valid] = true,
    // Marking work is split once a worker's local stack grows past this many references.
    marking_chunk_size:                  usize                [|v: &usize| *v > 1] = 1024,
    // Return the pages of free regions to the OS after a collection.
    release_free_pages:                  bool                 [always_valid] = true,
    // Verify heap references after every pause.
    verify_heap:                         bool                 [always_valid] = cfg!(feature = "extreme_assertions"),
}

impl Options {
    /// Set an option given its camel-case name as used on binding command lines, e.g. `regionSize`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);

        trace!("Trying to process option pair: ({})", sr);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    pub fn log_region_size(&self) -> usize {
        self.region_size.trailing_zeros() as usize
    }
}

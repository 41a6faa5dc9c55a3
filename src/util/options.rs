//! Options that select which barriers are synthesized and how.
//!
//! Options can be set programmatically with [`BarrierOptions::set_from_str`], or from
//! environment variables prefixed with `GCBARRIER_` (e.g. `GCBARRIER_CONDITIONAL_CARD_MARKING=true`)
//! by calling [`BarrierOptions::read_env_var_settings`].

use std::default::Default;

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Barrier synthesis options. See the module documentation.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct BarrierOptions {
            $($(#[$outer])* pub $name: $type),*
        }

        impl BarrierOptions {
            /// Set an option from its name and a string value. Returns `true` if the option was
            /// set. Invalid or unparsable values leave the option unchanged.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
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
                    _ => {
                        warn!("Unknown barrier option {}", s);
                        false
                    }
                }
            }

            /// Apply every environment variable that starts with `GCBARRIER_` and names an option
            /// (such as `GCBARRIER_VERIFY_OBJECTS`). Other variables are ignored.
            pub fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "GCBARRIER_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for BarrierOptions {
            fn default() -> Self {
                BarrierOptions {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// Emit the SATB pre-write barrier for reference stores.
    satb_barrier:             bool [always_valid] = true,
    /// Emit the load-reference barrier after reference loads.
    load_reference_barrier:   bool [always_valid] = true,
    /// Emit the card-marking post-write barrier after reference stores and CAS.
    card_barrier:             bool [always_valid] = true,
    /// Make reference CAS tolerate from-space aliases of the expected value.
    cas_barrier:              bool [always_valid] = true,
    /// Read the card before dirtying it, and skip the store if it is already dirty.
    conditional_card_marking: bool [always_valid] = false,
    /// Check that values recorded by the SATB barrier are plausible objects (debugging aid).
    verify_objects:           bool [always_valid] = false,
    /// Record the referent of weak and phantom loads in the SATB queue while marking, so that a
    /// loaded referent survives the current cycle.
    keep_alive_weak_loads:    bool [always_valid] = true,
}

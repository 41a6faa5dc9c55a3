use itertools::Itertools;

use super::*;
use crate::codegen::{Fragment, FragmentBuilder, Inst, VRegAllocator};
use crate::util::{BarrierConfig, BarrierOptions};

/// Selects the barriers for an access and emits the access together with them.
///
/// All emitters of one fragment share the builder's scratch registers, so a store with both a
/// pre-write barrier and a card mark needs no more temporaries than the larger of the two.
pub struct BarrierPlanner {
    config: BarrierConfig,
    options: BarrierOptions,
}

impl BarrierPlanner {
    /// Create a planner. Panics if `config` is invalid; hosts that want to report configuration
    /// errors should call [`BarrierConfig::validate`] first.
    pub fn new(config: BarrierConfig, options: BarrierOptions) -> Self {
        if let Err(e) = config.validate() {
            panic!("Invalid barrier configuration: {}", e);
        }
        info!(
            "Barrier planner: card table {:?}, region shift {}, options {:?}",
            config.card_table_base, config.region_shift, options
        );
        BarrierPlanner { config, options }
    }

    pub fn config(&self) -> &BarrierConfig {
        &self.config
    }

    pub fn options(&self) -> &BarrierOptions {
        &self.options
    }

    /// The barriers emitted for `desc`, in emission order.
    pub fn selected_barriers(&self, desc: &MemoryAccessDescriptor) -> Vec<BarrierKind> {
        let options = &self.options;
        let mut barriers = vec![];
        match desc.kind {
            AccessKind::Load => {
                if options.load_reference_barrier {
                    barriers.push(BarrierKind::LoadReference);
                }
                if desc.strength.is_weak_or_phantom()
                    && options.keep_alive_weak_loads
                    && options.satb_barrier
                {
                    barriers.push(BarrierKind::KeepAlive);
                }
            }
            AccessKind::Store => {
                if options.satb_barrier {
                    barriers.push(BarrierKind::Satb);
                }
                if options.card_barrier {
                    barriers.push(BarrierKind::CardMark);
                }
            }
            AccessKind::CompareAndSwap => {
                if options.satb_barrier {
                    barriers.push(BarrierKind::Satb);
                }
                if options.cas_barrier {
                    barriers.push(BarrierKind::ForwardingAwareCas);
                }
                if options.card_barrier {
                    barriers.push(BarrierKind::CardMark);
                }
            }
        }
        barriers
    }

    /// Synthesize the access described by `desc` on `operands`, with its barriers.
    ///
    /// `vregs` is the host's register allocator state; scratch registers are taken from it.
    pub fn plan(
        &self,
        vregs: &mut VRegAllocator,
        ctx: &BarrierContext,
        desc: &MemoryAccessDescriptor,
        operands: &AccessOperands,
    ) -> Fragment {
        assert_eq!(
            desc.kind,
            operands.kind(),
            "Operands for a {} given for a {} access",
            operands.kind(),
            desc.kind
        );
        let barriers = self.selected_barriers(desc);
        let name = fragment_name(desc);
        debug!(
            "Planning {}: {}",
            name,
            if barriers.is_empty() {
                "no barriers".to_string()
            } else {
                barriers.iter().join(", ")
            }
        );

        let mut b = FragmentBuilder::new(name, vregs);
        match *operands {
            AccessOperands::Load { address, result } => {
                self.plan_load(&mut b, ctx, desc, &barriers, address, result)
            }
            AccessOperands::Store { address, value } => {
                self.plan_store(&mut b, ctx, desc, &barriers, address, value)
            }
            AccessOperands::CompareAndSwap {
                address,
                expected,
                new_value,
                success,
            } => {
                let cas = CasOperands {
                    address: address.into(),
                    expected,
                    new_value: new_value.into(),
                    success,
                };
                self.plan_cas(&mut b, ctx, desc, &barriers, cas)
            }
        }
        b.finish()
    }

    fn plan_load(
        &self,
        b: &mut FragmentBuilder,
        ctx: &BarrierContext,
        desc: &MemoryAccessDescriptor,
        barriers: &[BarrierKind],
        address: VReg,
        result: VReg,
    ) {
        b.alive(address);
        b.def(result);
        b.emit(Inst::Load {
            dst: result,
            base: address.into(),
            offset: 0,
            width: desc.slot_width(),
        });
        if desc.compressed {
            b.input(ctx.heap_base);
            b.emit(Inst::UncompressRef {
                dst: result,
                src: result.into(),
                heap_base: ctx.heap_base,
                shift: self.config.compressed.shift,
            });
        }
        if barriers.contains(&BarrierKind::LoadReference) {
            LoadReferenceBarrierEmitter::new(&self.config).emit(
                b,
                ctx,
                LrbOperands {
                    object: result.into(),
                    load_address: address.into(),
                    result,
                },
                desc.strength,
                desc.known_non_null,
            );
        }
        if barriers.contains(&BarrierKind::KeepAlive) {
            // The runtime may have cleared the referent, so null check again.
            PreWriteMarkBarrierEmitter::new(&self.config, self.options.verify_objects).emit(
                b,
                ctx,
                SatbOperands {
                    previous: PreviousValue::Provided(result.into()),
                    compressed: false,
                    known_non_null: false,
                },
            );
        }
    }

    fn plan_store(
        &self,
        b: &mut FragmentBuilder,
        ctx: &BarrierContext,
        desc: &MemoryAccessDescriptor,
        barriers: &[BarrierKind],
        address: VReg,
        value: VReg,
    ) {
        b.alive(address);
        b.alive(value);
        if barriers.contains(&BarrierKind::Satb) {
            PreWriteMarkBarrierEmitter::new(&self.config, self.options.verify_objects).emit(
                b,
                ctx,
                SatbOperands {
                    previous: PreviousValue::Load {
                        address: address.into(),
                    },
                    compressed: desc.compressed,
                    known_non_null: false,
                },
            );
        }
        let stored = if desc.compressed {
            b.input(ctx.heap_base);
            let narrow = b.temp();
            b.emit(Inst::CompressRef {
                dst: narrow,
                src: value.into(),
                heap_base: ctx.heap_base,
                shift: self.config.compressed.shift,
            });
            narrow
        } else {
            value
        };
        b.emit(Inst::Store {
            base: address.into(),
            offset: 0,
            src: stored.into(),
            width: desc.slot_width(),
        });
        if barriers.contains(&BarrierKind::CardMark) {
            CardMarkEmitter::new(&self.config, self.options.conditional_card_marking).emit(
                b,
                ctx,
                address.into(),
            );
        }
    }

    fn plan_cas(
        &self,
        b: &mut FragmentBuilder,
        ctx: &BarrierContext,
        desc: &MemoryAccessDescriptor,
        barriers: &[BarrierKind],
        operands: CasOperands,
    ) {
        // The pre-write barrier reads `expected` first. It is still in/out, not alive.
        b.inout(operands.expected);
        if barriers.contains(&BarrierKind::Satb) {
            // A successful CAS overwrites the expected value (or an alias of it).
            PreWriteMarkBarrierEmitter::new(&self.config, self.options.verify_objects).emit(
                b,
                ctx,
                SatbOperands {
                    previous: PreviousValue::Provided(operands.expected.into()),
                    compressed: desc.compressed,
                    known_non_null: desc.known_non_null,
                },
            );
        }
        let cas = ForwardingAwareCompareAndSwap::new(&self.config);
        if barriers.contains(&BarrierKind::ForwardingAwareCas) {
            cas.emit(b, ctx, operands, desc.compressed);
        } else {
            cas.emit_plain(b, operands, desc.compressed);
        }
        if barriers.contains(&BarrierKind::CardMark) {
            CardMarkEmitter::new(&self.config, self.options.conditional_card_marking).emit(
                b,
                ctx,
                operands.address,
            );
        }
    }
}

fn fragment_name(desc: &MemoryAccessDescriptor) -> String {
    let mut name = desc.kind.to_string();
    if desc.kind == AccessKind::Load {
        name = format!("{}_{}", name, desc.strength);
    }
    if desc.compressed {
        name.push_str("_narrow");
    }
    if desc.known_non_null {
        name.push_str("_nonnull");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::RuntimeEntry;

    fn planner(options: BarrierOptions) -> BarrierPlanner {
        BarrierPlanner::new(BarrierConfig::default(), options)
    }

    fn load(planner: &BarrierPlanner, desc: MemoryAccessDescriptor) -> Fragment {
        let mut vregs = VRegAllocator::new();
        let operands = AccessOperands::Load {
            address: vregs.fresh(),
            result: vregs.fresh(),
        };
        planner.plan(&mut vregs, &BarrierContext::default(), &desc, &operands)
    }

    #[test]
    fn selection() {
        let p = planner(BarrierOptions::default());
        assert_eq!(
            p.selected_barriers(&MemoryAccessDescriptor::store()),
            vec![BarrierKind::Satb, BarrierKind::CardMark]
        );
        assert_eq!(
            p.selected_barriers(&MemoryAccessDescriptor::load(ReferenceStrength::Strong)),
            vec![BarrierKind::LoadReference]
        );
        assert_eq!(
            p.selected_barriers(&MemoryAccessDescriptor::load(ReferenceStrength::Phantom)),
            vec![BarrierKind::LoadReference, BarrierKind::KeepAlive]
        );
        assert_eq!(
            p.selected_barriers(&MemoryAccessDescriptor::compare_and_swap()),
            vec![
                BarrierKind::Satb,
                BarrierKind::ForwardingAwareCas,
                BarrierKind::CardMark
            ]
        );
    }

    #[test]
    fn disabled_barriers() {
        let mut options = BarrierOptions::default();
        assert!(options.set_from_str("satb_barrier", "false"));
        assert!(options.set_from_str("card_barrier", "false"));
        let p = planner(options);
        assert!(p
            .selected_barriers(&MemoryAccessDescriptor::store())
            .is_empty());
        assert_eq!(
            p.selected_barriers(&MemoryAccessDescriptor::load(ReferenceStrength::Weak)),
            vec![BarrierKind::LoadReference]
        );
    }

    #[test]
    fn weak_load_keeps_referent_alive() {
        let p = planner(BarrierOptions::default());
        let fragment = load(&p, MemoryAccessDescriptor::load(ReferenceStrength::Weak));
        assert_eq!(fragment.name(), "load_weak");
        assert_eq!(
            fragment.runtime_calls(),
            vec![RuntimeEntry::LrbResolveWeak, RuntimeEntry::SatbEnqueue]
        );
        // The result is an output, not an input of the keep-alive barrier.
        assert_eq!(fragment.contract().defs, vec![VReg(1)]);
    }

    #[test]
    fn store_shares_scratch_registers() {
        let p = planner(BarrierOptions::default());
        let mut vregs = VRegAllocator::new();
        let operands = AccessOperands::Store {
            address: vregs.fresh(),
            value: vregs.fresh(),
        };
        let fragment = p.plan(
            &mut vregs,
            &BarrierContext::default(),
            &MemoryAccessDescriptor::store(),
            &operands,
        );
        assert_eq!(fragment.contract().temps.len(), 3);
        assert_eq!(fragment.name(), "store");
    }

    #[test]
    fn compressed_store_compresses_value() {
        let p = planner(BarrierOptions::default());
        let mut vregs = VRegAllocator::new();
        let operands = AccessOperands::Store {
            address: vregs.fresh(),
            value: vregs.fresh(),
        };
        let fragment = p.plan(
            &mut vregs,
            &BarrierContext::default(),
            &MemoryAccessDescriptor::store().compressed(),
            &operands,
        );
        assert!(fragment.instructions().any(|i| matches!(
            i,
            Inst::Store {
                width: crate::codegen::Width::Int,
                ..
            }
        )));
        assert_eq!(fragment.name(), "store_narrow");
    }

    #[test]
    fn cas_expected_stays_inout_under_pre_write_barrier() {
        let p = planner(BarrierOptions::default());
        let mut vregs = VRegAllocator::new();
        let expected = VReg(1);
        let operands = AccessOperands::CompareAndSwap {
            address: vregs.fresh(),
            expected: vregs.fresh(),
            new_value: vregs.fresh(),
            success: vregs.fresh(),
        };
        let fragment = p.plan(
            &mut vregs,
            &BarrierContext::default(),
            &MemoryAccessDescriptor::compare_and_swap(),
            &operands,
        );
        assert_eq!(fragment.contract().inout, vec![expected]);
        assert!(!fragment.contract().alive.contains(&expected.into()));
        assert_eq!(
            fragment.runtime_calls(),
            vec![RuntimeEntry::SatbEnqueue]
        );
        assert_eq!(fragment.atomic_count(), 3);
    }

    /// Position of the first temp write after an output has been written, in layout order.
    fn temp_written_after_output(fragment: &Fragment) -> Option<usize> {
        let contract = fragment.contract();
        let insts: Vec<&Inst> = fragment.instructions().collect();
        let first_output = insts
            .iter()
            .position(|i| i.defs().iter().any(|r| contract.defs.contains(r)))?;
        insts[first_output..]
            .iter()
            .position(|i| i.defs().iter().any(|r| contract.temps.contains(r)))
            .map(|offset| first_output + offset)
    }

    #[test]
    fn outputs_are_live_while_temps_are_written() {
        let p = planner(BarrierOptions::default());
        // The load moves the slot value into `result`, then loads the heap state into a temp.
        let fragment = load(&p, MemoryAccessDescriptor::load(ReferenceStrength::Strong));
        assert!(temp_written_after_output(&fragment).is_some());

        // The first CAS sets `success`, the retry path then decodes the witness into temps.
        let mut vregs = VRegAllocator::new();
        let operands = AccessOperands::CompareAndSwap {
            address: vregs.fresh(),
            expected: vregs.fresh(),
            new_value: vregs.fresh(),
            success: vregs.fresh(),
        };
        let fragment = p.plan(
            &mut vregs,
            &BarrierContext::default(),
            &MemoryAccessDescriptor::compare_and_swap(),
            &operands,
        );
        assert!(temp_written_after_output(&fragment).is_some());
    }

    #[test]
    #[should_panic(expected = "given for a load access")]
    fn mismatched_operands_are_fatal() {
        let p = planner(BarrierOptions::default());
        let mut vregs = VRegAllocator::new();
        let operands = AccessOperands::Store {
            address: vregs.fresh(),
            value: vregs.fresh(),
        };
        p.plan(
            &mut vregs,
            &BarrierContext::default(),
            &MemoryAccessDescriptor::load(ReferenceStrength::Strong),
            &operands,
        );
    }

    #[test]
    #[should_panic(expected = "Invalid barrier configuration")]
    fn invalid_config_is_fatal() {
        let config = BarrierConfig {
            card_shift: 30,
            ..BarrierConfig::default()
        };
        BarrierPlanner::new(config, BarrierOptions::default());
    }
}

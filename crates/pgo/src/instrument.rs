//! Instrumentation synthesis.
//!
//! By default each imported non-internal block gets a 32-bit execution
//! counter, and each virtual call in a class-profile block gets a
//! receiver-type histogram probe. Counters live in a runtime-allocated
//! buffer described by the schema; the schema determines how many slots
//! the runtime reserves and carries the bytecode offset keying each slot.

use tracing::debug;

use tempo_ir::{visit_virtual_calls, Block, Expr, Function, HelperFunc, ProbeSink};

use crate::{
    ctx::CompileContext,
    error::{FlowError, Result},
    host::{AllocError, Host},
    schema::{SchemaEntry, CLASS_FLAG, INTERFACE_FLAG},
};

/// Appends the two-entry histogram schema record for each virtual call
/// of a class-profile block.
struct SchemaGen<'a> {
    schema: &'a mut Vec<SchemaEntry>,
}

impl ProbeSink for SchemaGen<'_> {
    fn on_virtual_call(&mut self, func: &mut Function, call: Expr) {
        let call = func.call_data(call);
        let probe = call.probe.expect("class-profile candidate without probe info");

        let mut other = CLASS_FLAG;
        if call.is_virtual_stub {
            other |= INTERFACE_FLAG;
        } else {
            debug_assert!(call.is_virtual);
        }

        // The rows entry reuses the count entry's offset and flags;
        // consumers treat the pair as one logical record.
        self.schema
            .push(SchemaEntry::histogram_count(probe.il_offset, other));
        self.schema
            .push(SchemaEntry::histogram_rows(probe.il_offset, other));
    }
}

/// Rewrites each profiled virtual call to feed its receiver through the
/// histogram helper, and restores the dispatch stub address either way.
struct ProbeInserter<'a> {
    schema: &'a [SchemaEntry],
    buffer_base: usize,
    cursor: &'a mut usize,
    instrument: bool,
    rewrite: bool,
    count: u32,
}

impl ProbeSink for ProbeInserter<'_> {
    fn on_virtual_call(&mut self, func: &mut Function, call: Expr) {
        let (receiver, probe) = {
            let data = func.call_data(call);
            let probe = data.probe.expect("class-profile candidate without probe info");
            (data.receiver, probe)
        };

        debug!(
            probe_index = probe.probe_index,
            il_offset = probe.il_offset,
            "found call to profile"
        );

        self.count += 1;

        if self.instrument {
            // Two schema entries per class probe.
            let histogram_addr = self.buffer_base + self.schema[*self.cursor].offset as usize;
            *self.cursor += 2;

            if self.rewrite {
                // The receiver is needed once for the helper and once for
                // the dispatch itself, so it is evaluated into a temp:
                //   (tmp := this, (classprofile(tmp, &histogram), tmp))
                let tmp = func.new_ref_temp();
                let tmp_dst = func.new_local_ref(tmp);
                let assign = func.new_assign(tmp_dst, receiver);
                let tmp_arg = func.new_local_ref(tmp);
                let histogram = func.new_int(histogram_addr as i64);
                let helper =
                    func.new_helper_call(HelperFunc::ClassProfile, &[tmp_arg, histogram]);
                let tmp_use = func.new_local_ref(tmp);
                let fire = func.new_comma(helper, tmp_use);
                let rewritten = func.new_comma(assign, fire);
                func.call_data_mut(call).receiver = rewritten;
            }
        }

        // Undo the import-time probe bookkeeping whether instrumenting
        // or not.
        func.call_data_mut(call).stub_addr = Some(probe.stub_addr);
    }
}

/// Add instrumentation probes to the method.
pub fn instrument_method<H: Host + ?Sized>(
    func: &mut Function,
    ctx: &mut CompileContext,
    host: &mut H,
) -> Result<()> {
    let blocks: Vec<Block> = func.layout.iter_block().collect();

    // First walk: build the schema. Un-imported blocks are never
    // profiled; internal blocks get class probes (the indirect-call
    // transformer splits blocks under them) but no count probe.
    let mut schema: Vec<SchemaEntry> = Vec::new();
    let mut count_of_blocks: u32 = 0;

    for &block in &blocks {
        if !func.blocks[block].is_imported() {
            continue;
        }

        if func.blocks[block].has_class_profile() {
            let mut schema_gen = SchemaGen {
                schema: &mut schema,
            };
            visit_virtual_calls(func, block, &mut schema_gen);
        }

        let data = &func.blocks[block];
        if data.is_internal() {
            continue;
        }

        schema.push(SchemaEntry::block_count(data.code_offset));
        count_of_blocks += 1;
    }

    // Class probes were counted during import.
    let mut count_of_calls = ctx.class_probe_count;
    if schema.len() as u32 != count_of_calls * 2 + count_of_blocks {
        return Err(FlowError::SchemaCursorMismatch {
            found: schema.len() as u32,
            expected: count_of_calls * 2 + count_of_blocks,
        });
    }

    // Optionally bail out when there are less than three blocks and no
    // call sites to profile. One block is common; zero or two are not
    // expected. Call sites force the walk below regardless, since their
    // stub addresses must be restored.
    if ctx.config.minimal_profiling && count_of_blocks < 3 && count_of_calls == 0 {
        debug!(count_of_blocks, "not instrumenting trivial method");
        if count_of_blocks != 1 {
            return Err(FlowError::BlockCountMismatch {
                found: count_of_blocks,
                expected: 1,
            });
        }
        return Ok(());
    }

    debug!(count_of_blocks, count_of_calls, "instrumenting method");

    // Allocate the counter buffer. NotImplemented turns instrumentation
    // off but cannot end the walk early: calls we might have profiled
    // still need their stub addresses cleaned up.
    let mut instrument = true;
    let mut buffer_base = 0usize;
    match host.allocate_counters(ctx.method_handle, &mut schema) {
        Ok(base) => buffer_base = base,
        Err(AllocError::NotImplemented) => {
            debug!("counter allocation not implemented, not instrumenting");
            instrument = false;
        }
        Err(AllocError::Failed(code)) => return Err(FlowError::CounterAllocation(code)),
    }

    if ctx.config.class_profiling {
        // Only works when jitting.
        assert!(!ctx.is_prejit);
    }
    let rewrite = instrument && ctx.config.class_profiling && !ctx.is_prejit;

    // Second walk: consume schema slots in the same order they were
    // emitted, splicing probe and counter IR.
    let mut cursor = 0usize;
    let mut entry_counter_addr: Option<usize> = None;

    for &block in &blocks {
        if !func.blocks[block].is_imported() {
            continue;
        }

        if func.blocks[block].has_class_profile() {
            let inserted = {
                let mut inserter = ProbeInserter {
                    schema: &schema,
                    buffer_base,
                    cursor: &mut cursor,
                    instrument,
                    rewrite,
                    count: 0,
                };
                visit_virtual_calls(func, block, &mut inserter);
                inserter.count
            };

            if inserted > count_of_calls {
                return Err(FlowError::CallCountMismatch {
                    found: inserted,
                    expected: count_of_calls,
                });
            }
            count_of_calls -= inserted;
        }

        if func.blocks[block].is_internal() {
            continue;
        }

        count_of_blocks -= 1;

        if instrument {
            let data = &func.blocks[block];
            if data.code_offset != schema[cursor].il_offset {
                return Err(FlowError::SchemaCursorMismatch {
                    found: data.code_offset,
                    expected: schema[cursor].il_offset,
                });
            }

            let addr = buffer_base + schema[cursor].offset as usize;
            entry_counter_addr.get_or_insert(addr);
            cursor += 1;

            // *addr := *addr + 1
            let value = func.new_counter_load(addr);
            let one = func.new_int(1);
            let bumped = func.new_add(value, one);
            let store = func.new_counter_store(addr, bumped);
            func.new_stmt_at_head(block, store);
        }
    }

    if !instrument {
        return Ok(());
    }

    // Every allocated counter was initialized, in schema order.
    if count_of_blocks != 0 {
        return Err(FlowError::BlockCountMismatch {
            found: count_of_blocks,
            expected: 0,
        });
    }
    if count_of_calls != 0 {
        return Err(FlowError::CallCountMismatch {
            found: count_of_calls,
            expected: 0,
        });
    }
    if cursor != schema.len() {
        return Err(FlowError::SchemaCursorMismatch {
            found: cursor as u32,
            expected: schema.len() as u32,
        });
    }

    ctx.entry_counter_addr = entry_counter_addr;

    if ctx.is_prejit {
        let counter_addr = entry_counter_addr.expect("prejit method without a counter");
        insert_entry_hook(func, ctx, host, counter_addr);
    }

    Ok(())
}

/// Splice the one-shot method-entry callback for prejitted code:
/// `if (*entry_counter == 0) { bbt_fcn_enter(method) }` at the end of a
/// scratch first block.
fn insert_entry_hook<H: Host + ?Sized>(
    func: &mut Function,
    ctx: &CompileContext,
    host: &mut H,
    counter_addr: usize,
) {
    let handle_imm = if ctx.is_ready_to_run {
        let token = host.method_def_token(ctx.method_handle);
        let resolved = host.resolve_token(token);
        host.embed_method_handle(resolved)
    } else {
        host.embed_method_handle(ctx.method_handle)
    };

    let arg = func.new_method_handle(handle_imm);
    let call = func.new_helper_call(HelperFunc::BbtFcnEnter, &[arg]);
    let value = func.new_counter_load(counter_addr);
    let zero = func.new_int(0);
    let cond = func.new_ne(value, zero);
    let guard = func.new_guard(cond, call);

    let scratch = func.ensure_entry_scratch();
    func.new_stmt_at_end(scratch, guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaKind, HISTOGRAM_SIZE};
    use crate::test_util::*;
    use tempo_ir::builder::test_util::*;
    use tempo_ir::ExprData;

    fn block_stmt_roots(func: &Function, block: Block) -> Vec<Expr> {
        func.layout
            .iter_stmt(block)
            .map(|stmt| func.stmts[stmt].root)
            .collect()
    }

    fn is_counter_bump(func: &Function, root: Expr, addr: usize) -> bool {
        let ExprData::CounterStore { addr: store_addr, value } = func.exprs[root] else {
            return false;
        };
        if store_addr != addr {
            return false;
        }
        let ExprData::Add(lhs, _) = func.exprs[value] else {
            return false;
        };
        matches!(func.exprs[lhs], ExprData::CounterLoad { addr: load_addr } if load_addr == addr)
    }

    #[test]
    fn minimal_profiling_skips_trivial_method() {
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        builder.imported(b0);
        builder.returns(b0);
        let mut func = builder.finish();

        let mut ctx = test_ctx();
        ctx.config.minimal_profiling = true;
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        // No allocation, no inserted statements.
        assert_eq!(host.alloc_calls, 0);
        assert!(block_stmt_roots(&func, b0).is_empty());
        assert_eq!(ctx.entry_counter_addr, None);
    }

    #[test]
    fn linear_three_block_method() {
        let (mut func, blocks) = linear3(&[None, None, None]);
        let mut ctx = test_ctx();
        ctx.config.minimal_profiling = true;
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        assert_eq!(host.alloc_calls, 1);
        assert_eq!(host.allocated_bytes, 12);

        // One counter bump at the head of each block, in schema order.
        for (i, block) in blocks.into_iter().enumerate() {
            let roots = block_stmt_roots(&func, block);
            assert_eq!(roots.len(), 1);
            assert!(is_counter_bump(&func, roots[0], TEST_BUFFER_BASE + i * 4));
        }

        assert_eq!(ctx.entry_counter_addr, Some(TEST_BUFFER_BASE));
    }

    #[test]
    fn schema_covers_blocks_and_probes() {
        let (mut func, [b0, _, _]) = linear3(&[None, None, None]);
        func.blocks[b0]
            .flags
            .insert(tempo_ir::BlockFlags::HAS_CLASS_PROFILE);
        new_virtual_call_stmt(&mut func, b0, probe(0, 1), false);
        new_virtual_call_stmt(&mut func, b0, probe(1, 3), true);

        let mut ctx = test_ctx();
        ctx.config.class_profiling = true;
        ctx.class_probe_count = 2;
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        // 2 entries per probe plus 3 block counters.
        let schema = host.schema.as_ref().unwrap();
        assert_eq!(schema.len(), 2 * 2 + 3);

        // Probe pairs are contiguous, count before rows, flags shared.
        assert_eq!(schema[0].kind, SchemaKind::TypeHandleHistogramCount);
        assert_eq!(schema[0].other, CLASS_FLAG);
        assert_eq!(schema[1].kind, SchemaKind::TypeHandleHistogramTypeHandle);
        assert_eq!(schema[1].count, HISTOGRAM_SIZE);
        assert_eq!(schema[1].il_offset, schema[0].il_offset);

        assert_eq!(schema[2].kind, SchemaKind::TypeHandleHistogramCount);
        assert_eq!(schema[2].other, CLASS_FLAG | INTERFACE_FLAG);
        assert_eq!(schema[3].kind, SchemaKind::TypeHandleHistogramTypeHandle);

        // Block counters follow in layout order.
        for (entry, il_offset) in schema[4..].iter().zip([0, 5, 10]) {
            assert_eq!(entry.kind, SchemaKind::BasicBlockIntCount);
            assert_eq!(entry.il_offset, il_offset);
        }
    }

    #[test]
    fn probe_rewrite_wraps_receiver() {
        let (mut func, [b0, _, _]) = linear3(&[None, None, None]);
        func.blocks[b0]
            .flags
            .insert(tempo_ir::BlockFlags::HAS_CLASS_PROFILE);
        let call = new_virtual_call_stmt(&mut func, b0, probe(0, 1), false);

        let mut ctx = test_ctx();
        ctx.config.class_profiling = true;
        ctx.class_probe_count = 1;
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        // Receiver became (tmp := this, (classprofile(tmp, &hist), tmp)).
        let receiver = func.call_data(call).receiver;
        let ExprData::Comma(assign, fire) = func.exprs[receiver] else {
            panic!("receiver not rewritten");
        };
        assert!(matches!(func.exprs[assign], ExprData::Assign { .. }));
        let ExprData::Comma(helper, tmp_use) = func.exprs[fire] else {
            panic!("missing helper comma");
        };
        let ExprData::HelperCall { helper: kind, ref args } = func.exprs[helper] else {
            panic!("missing helper call");
        };
        assert_eq!(kind, HelperFunc::ClassProfile);
        assert_eq!(args.len(), 2);
        assert!(matches!(func.exprs[tmp_use], ExprData::LocalRef(..)));

        // Histogram address points at the probe's buffer slot.
        assert!(matches!(
            func.exprs[args[1]],
            ExprData::IntConst(addr) if addr == TEST_BUFFER_BASE as i64
        ));

        // Stub address restored.
        assert_eq!(func.call_data(call).stub_addr, Some(probe(0, 1).stub_addr));
    }

    #[test]
    fn not_implemented_still_restores_stub_addrs() {
        let (mut func, [b0, b1, _]) = linear3(&[None, None, None]);
        func.blocks[b0]
            .flags
            .insert(tempo_ir::BlockFlags::HAS_CLASS_PROFILE);
        let call = new_virtual_call_stmt(&mut func, b0, probe(0, 1), false);
        let locals_before = func.locals.len();

        let mut ctx = test_ctx();
        ctx.config.class_profiling = true;
        ctx.class_probe_count = 1;
        let mut host = TestHost::failing_with(AllocError::NotImplemented);

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        // Stub restored, but no rewrite, no temps, no counters.
        assert_eq!(func.call_data(call).stub_addr, Some(probe(0, 1).stub_addr));
        let receiver = func.call_data(call).receiver;
        assert!(matches!(func.exprs[receiver], ExprData::LocalRef(..)));
        assert_eq!(func.locals.len(), locals_before);
        assert!(block_stmt_roots(&func, b1).is_empty());
        assert_eq!(ctx.entry_counter_addr, None);
    }

    #[test]
    fn other_allocation_failures_are_fatal() {
        let (mut func, _) = linear3(&[None, None, None]);
        let mut ctx = test_ctx();
        let mut host = TestHost::failing_with(AllocError::Failed(0x8000_4005));

        let err = instrument_method(&mut func, &mut ctx, &mut host).unwrap_err();
        assert!(matches!(err, FlowError::CounterAllocation(0x8000_4005)));
    }

    #[test]
    fn prejit_inserts_entry_hook() {
        let (mut func, _) = linear3(&[None, None, None]);
        let mut ctx = test_ctx();
        ctx.is_prejit = true;
        ctx.method_handle = crate::host::MethodHandle(0x40);
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();

        assert!(func.has_entry_scratch());
        let scratch = func.entry_block().unwrap();
        let roots = block_stmt_roots(&func, scratch);
        assert_eq!(roots.len(), 1);

        // if (*entry_counter == 0) { bbt_fcn_enter(method) }
        let ExprData::Guard { cond, action } = func.exprs[roots[0]] else {
            panic!("missing entry hook guard");
        };
        let ExprData::Ne(load, _) = func.exprs[cond] else {
            panic!("guard not comparing the counter");
        };
        assert!(matches!(
            func.exprs[load],
            ExprData::CounterLoad { addr } if addr == TEST_BUFFER_BASE
        ));
        let ExprData::HelperCall { helper, ref args } = func.exprs[action] else {
            panic!("guard without helper call");
        };
        assert_eq!(helper, HelperFunc::BbtFcnEnter);
        assert!(matches!(func.exprs[args[0]], ExprData::MethodHandleConst(0x40)));
    }

    #[test]
    fn no_entry_hook_when_not_prejit() {
        let (mut func, _) = linear3(&[None, None, None]);
        let mut ctx = test_ctx();
        let mut host = TestHost::new();

        instrument_method(&mut func, &mut ctx, &mut host).unwrap();
        assert!(!func.has_entry_scratch());
    }

    #[test]
    fn stale_probe_count_is_fatal() {
        // The import-time candidate count disagrees with what the schema
        // walk finds.
        let (mut func, _) = linear3(&[None, None, None]);
        let mut ctx = test_ctx();
        ctx.class_probe_count = 2;
        let mut host = TestHost::new();

        let err = instrument_method(&mut func, &mut ctx, &mut host).unwrap_err();
        assert!(matches!(
            err,
            FlowError::SchemaCursorMismatch {
                found: 3,
                expected: 7
            }
        ));
        assert_eq!(host.alloc_calls, 0);
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Ast, AstBuilder, NodeIndex};
    use crate::config::OptimizerConfig;
    use crate::dfg::NodeId;
    use crate::escape::{EscapeAnalyzer, EscapeInfo, EscapeReason, EscapeState, ObjectType};
    use crate::opt::{
        AllocLocation, DecisionReason, LocalSlot, OptimizationResult, ScalarReplacementOptimizer,
        StackAllocationOptimizer, StackSlot,
    };

    fn analyzed(ast: &Ast, config: &OptimizerConfig) -> EscapeAnalyzer {
        let mut analyzer = EscapeAnalyzer::with_config(config);
        analyzer.analyze(ast);
        analyzer
    }

    /// `$name = new C(1);` — a 32-byte object that never escapes.
    fn small_object(b: &mut AstBuilder, name: &str) -> NodeIndex {
        let arg = b.int(1);
        let obj = b.new_object("C", vec![arg]);
        b.assign_var(name, obj)
    }

    /// Local objects, an escaping one, a decomposable one and an oversized array.
    fn mixed_program() -> Ast {
        let mut b = AstBuilder::new();
        let mut stmts = vec![small_object(&mut b, "a"), small_object(&mut b, "b")];

        let escaping = b.new_object("Leak", vec![]);
        stmts.push(b.assign_var("leak", escaping));
        let leak = b.var("leak");
        stmts.push(b.call("publish", vec![leak]));

        let point = b.new_object("Point", vec![]);
        stmts.push(b.assign_var("p", point));
        let px = b.var_prop("p", "x");
        stmts.push(b.assign_var("x", px));

        let elements: Vec<NodeIndex> = (0..31).map(|i| b.int(i)).collect();
        let big = b.array(elements);
        stmts.push(b.assign_var("big", big));
        b.finish(stmts)
    }

    #[test]
    fn local_object_goes_on_the_stack() {
        let mut b = AstBuilder::new();
        let obj = b.new_object("Point", vec![]);
        let s = b.assign_var("p", obj);
        let ast = b.finish(vec![s]);

        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let alloc = &result.allocations()[0];
        assert_eq!(alloc.location, AllocLocation::Stack);
        assert_eq!(alloc.decision, DecisionReason::FitsOnStack);
        assert_eq!(alloc.slot, Some(StackSlot::new(0)));
        assert_eq!(alloc.size, 64);
        assert_eq!(result.stack().stack_size(), 64);
    }

    #[test]
    fn returned_object_goes_to_the_heap() {
        let mut b = AstBuilder::new();
        let obj = b.new_object("Point", vec![]);
        let s1 = b.assign_var("p", obj);
        let p = b.var("p");
        let s2 = b.ret(Some(p));
        let f = b.function("make", &[], vec![s1, s2]);
        let ast = b.finish(vec![f]);

        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let alloc = &result.allocations()[0];
        assert_eq!(alloc.state, EscapeState::GlobalEscape);
        assert_eq!((alloc.location, alloc.decision), (AllocLocation::Heap, DecisionReason::Escapes));
        assert_eq!(alloc.slot, None);
        assert_eq!(alloc.reasons, vec![EscapeReason::Returned]);
    }

    #[test]
    fn independent_locals_take_consecutive_slots() {
        let mut b = AstBuilder::new();
        let stmts = vec![
            small_object(&mut b, "a"),
            small_object(&mut b, "b"),
            small_object(&mut b, "c"),
        ];
        let ast = b.finish(stmts);
        let analyzer = analyzed(&ast, &OptimizerConfig::default());

        let mut stack = StackAllocationOptimizer::default();
        stack.optimize(&analyzer);
        let slots: Vec<_> = analyzer
            .allocations()
            .into_iter()
            .map(|id| stack.decision(id).and_then(|d| d.slot))
            .collect();
        assert_eq!(
            slots,
            vec![Some(StackSlot::new(0)), Some(StackSlot::new(1)), Some(StackSlot::new(2))]
        );
        assert_eq!(stack.stack_size(), 96);
        assert_eq!(stack.slot_count(), 3);
    }

    #[test]
    fn object_with_two_field_loads_is_scalar_replaced() {
        let mut b = AstBuilder::new();
        let obj = b.new_object("Point", vec![]);
        let s1 = b.assign_var("p", obj);
        let px = b.var_prop("p", "x");
        let s2 = b.assign_var("a", px);
        let py = b.var_prop("p", "y");
        let s3 = b.assign_var("c", py);
        let ast = b.finish(vec![s1, s2, s3]);
        let analyzer = analyzed(&ast, &OptimizerConfig::default());
        let id = analyzer.allocations()[0];

        let mut result = OptimizationResult::new();
        result.optimize(&analyzer);
        assert_eq!(result.placement(id), Some(AllocLocation::ScalarReplaced));
        assert_eq!(result.stack().stack_size(), 0);

        let plan = result.scalar().plan(id).expect("plan for point");
        assert_eq!(plan.mappings.len(), 2);
        assert!(plan.fully_replaced);
        assert_eq!(plan.bytes_saved, 64);
        assert_eq!(result.scalar().field_slot(id, "x"), Some(LocalSlot::new(0)));
        assert_eq!(result.scalar().field_slot(id, "y"), Some(LocalSlot::new(1)));
        assert_eq!(result.scalar().field_slot(id, "z"), None);
        assert_eq!(result.statistics().scalar_bytes_saved, 64);
    }

    #[test]
    fn oversized_array_stays_on_the_heap() {
        let mut b = AstBuilder::new();
        let elements: Vec<NodeIndex> = (0..31).map(|i| b.int(i)).collect();
        let arr = b.array(elements);
        let s = b.assign_var("big", arr);
        let ast = b.finish(vec![s]);

        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let alloc = &result.allocations()[0];
        assert_eq!(alloc.state, EscapeState::NoEscape);
        assert_eq!(alloc.size, 512);
        assert_eq!((alloc.location, alloc.decision), (AllocLocation::Heap, DecisionReason::TooLarge));
    }

    #[test]
    fn frame_budget_overflow_falls_back_to_heap() {
        let mut b = AstBuilder::new();
        let stmts = (0..4).map(|i| small_object(&mut b, &format!("v{i}"))).collect();
        let ast = b.finish(stmts);
        let config = OptimizerConfig {
            max_frame_size: 100,
            ..OptimizerConfig::default()
        };

        let result = OptimizationResult::run(&ast, &config);
        let reasons: Vec<_> = result.allocations().iter().map(|a| a.decision).collect();
        assert_eq!(
            reasons,
            vec![
                DecisionReason::FitsOnStack,
                DecisionReason::FitsOnStack,
                DecisionReason::FitsOnStack,
                DecisionReason::StackOverflow,
            ]
        );
        assert_eq!(result.stack().stack_size(), 96);
    }

    #[test]
    fn object_limit_predicate_matches_custom_config() {
        let mut b = AstBuilder::new();
        let elements: Vec<NodeIndex> = (0..20).map(|i| b.int(i)).collect();
        let wide = b.array(elements);
        let s1 = b.assign_var("wide", wide);
        let obj = b.new_object("Point", vec![]);
        let s2 = b.assign_var("p", obj);
        let ast = b.finish(vec![s1, s2]);

        for max_object_size in [32, 512] {
            let config = OptimizerConfig {
                max_object_size,
                ..OptimizerConfig::default()
            };
            let analyzer = analyzed(&ast, &config);
            let mut stack = StackAllocationOptimizer::new(&config);
            stack.optimize(&analyzer);
            for info in analyzer.escape_infos() {
                let on_stack = stack.decision(info.node).unwrap().location == AllocLocation::Stack;
                assert_eq!(on_stack, info.fits_on_stack(config.max_object_size), "{info:?}");
            }
        }

        let wide = analyzed(&ast, &OptimizerConfig::default()).escape_infos().next().cloned().unwrap();
        assert_eq!(wide.estimated_size, 336);
        assert!(!wide.is_stack_allocatable());
        assert!(wide.fits_on_stack(512));
    }

    #[test]
    fn every_allocation_gets_exactly_one_decision() {
        let ast = mixed_program();
        let analyzer = analyzed(&ast, &OptimizerConfig::default());
        let mut result = OptimizationResult::new();
        result.optimize(&analyzer);

        let ids = analyzer.allocations();
        assert_eq!(ids.len(), 5);
        assert_eq!(result.stack().len(), ids.len());
        for id in &ids {
            assert!(result.stack().decision(*id).is_some(), "no decision for {id}");
        }
        let stats = result.statistics();
        assert_eq!(
            stats.stack_allocated + stats.scalar_replaced + stats.heap_allocated,
            stats.total_allocations
        );
    }

    #[test]
    fn frame_total_matches_stack_decisions() {
        let ast = mixed_program();
        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let stacked: u32 = result
            .stack()
            .decisions()
            .filter(|d| d.location == AllocLocation::Stack)
            .map(|d| d.size)
            .sum();
        assert_eq!(result.stack().stack_size(), stacked);
        assert_eq!(result.statistics().stack_bytes, u64::from(stacked));
        assert_eq!(stacked, 64);
    }

    #[test]
    fn statistics_count_escape_classes_and_graph() {
        let ast = mixed_program();
        let stats = OptimizationResult::run(&ast, &OptimizerConfig::default()).statistics();
        assert_eq!(stats.total_allocations, 5);
        assert_eq!(stats.no_escape, 4);
        assert_eq!(stats.global_escape, 1);
        assert_eq!(stats.scalar_replaceable, 1);
        assert_eq!((stats.stack_allocated, stats.scalar_replaced, stats.heap_allocated), (2, 1, 2));
        assert!(stats.dfg_nodes > 0 && stats.dfg_edges > 0);
        assert!(stats.fixpoint_iterations >= stats.dfg_nodes);
    }

    #[test]
    fn unknown_types_without_size_stay_on_the_heap() {
        let unknown = EscapeInfo::new(NodeId::new(0), ObjectType::Unknown, 0, false);
        let unsized_object = EscapeInfo::new(NodeId::new(1), ObjectType::Object, 0, false);
        let mut stack = StackAllocationOptimizer::default();
        stack.place([&unknown, &unsized_object]);

        let first = stack.decision(NodeId::new(0)).unwrap();
        assert_eq!((first.location, first.reason), (AllocLocation::Heap, DecisionReason::UnknownType));
        let second = stack.decision(NodeId::new(1)).unwrap();
        assert_eq!((second.location, second.size), (AllocLocation::Stack, 64));
    }

    #[test]
    fn escape_check_wins_over_every_other_rule() {
        let mut info = EscapeInfo::new(NodeId::new(0), ObjectType::Object, 4096, true);
        info.record_field("x", crate::dfg::ValueType::Int);
        info.can_scalar_replace = true;
        info.escalate(EscapeState::ArgEscape, EscapeReason::PassedToUnknown, None);

        let mut stack = StackAllocationOptimizer::default();
        stack.place([&info]);
        assert_eq!(stack.decision(info.node).unwrap().reason, DecisionReason::Escapes);

        let mut scalar = ScalarReplacementOptimizer::new();
        scalar.plan_all([&info]);
        assert_eq!(scalar.plans().count(), 0);
    }

    #[test]
    fn local_numbering_continues_across_plans() {
        let mut first = EscapeInfo::new(NodeId::new(3), ObjectType::Object, 48, true);
        first.record_field("a", crate::dfg::ValueType::Int);
        first.record_field("b", crate::dfg::ValueType::Int);
        first.can_scalar_replace = true;
        let mut second = EscapeInfo::new(NodeId::new(7), ObjectType::Object, 32, true);
        second.record_field("a", crate::dfg::ValueType::Float);
        second.can_scalar_replace = true;

        let mut scalar = ScalarReplacementOptimizer::new();
        scalar.plan_all([&first, &second]);
        assert_eq!(scalar.field_slot(NodeId::new(7), "a"), Some(LocalSlot::new(2)));
        assert_eq!(scalar.locals_used(), 3);
        assert_eq!(scalar.bytes_saved(), 80);
    }

    #[test]
    fn report_lists_totals_and_sites() {
        let ast = mixed_program();
        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let report = result.report();
        assert!(report.starts_with("Escape analysis report"));
        assert!(report.contains("allocations:        5 (no escape 4, arg escape 0, global escape 1, unknown 0)"));
        assert!(report.contains("placement:          stack 2, scalar replaced 1, heap 2"));
        assert!(report.contains("object Leak"));
        assert!(report.contains("[passed_to_unknown]"));
        assert!(report.contains("{x=local0}"));
        assert_eq!(report, result.to_string());
    }

    #[test]
    fn statistics_serialize_to_json() {
        let ast = mixed_program();
        let result = OptimizationResult::run(&ast, &OptimizerConfig::default());
        let stats = serde_json::to_value(result.statistics()).unwrap();
        assert_eq!(stats["total_allocations"], 5);
        let sites = serde_json::to_value(result.allocations()).unwrap();
        assert_eq!(sites[2]["location"], "heap");
        assert_eq!(sites[2]["decision"], "escapes");
        assert_eq!(sites[0]["slot"], 0);
    }
}

//! Module fixtures shared by the transformation tests.

use crate::transformation::{Transformation, TransformationContext};
use spvfuzz_ir::{
    validation, BasicBlock, Function, Id, Instruction, IrContext, Module, Opcode, Operand,
    StorageClass,
};

pub const VOID: Id = 1;
pub const FN_VOID: Id = 2;
pub const BOOL: Id = 3;
pub const TRUE: Id = 4;
pub const FALSE: Id = 5;
pub const INT: Id = 6;
pub const PTR_INT: Id = 7;
pub const ZERO: Id = 8;
pub const ONE: Id = 9;
pub const TWO: Id = 10;
pub const PTR_PRIVATE_INT: Id = 11;
pub const FN_INT_INT: Id = 12;
pub const GLOBAL: Id = 13;

pub const MAIN: Id = 20;
pub const CALLEE: Id = 21;

// Blocks of the diamond fixture
pub const ENTRY: Id = 30;
pub const LEFT: Id = 31;
pub const RIGHT: Id = 32;
pub const MERGE: Id = 33;

// Blocks of the loop fixture
pub const HEADER: Id = 31;
pub const BODY: Id = 32;
pub const BODY2: Id = 33;
pub const CONTINUE: Id = 34;
pub const LOOP_MERGE: Id = 35;

pub const VAR: Id = 40;

pub fn declarations() -> Module {
    let mut m = Module::new();
    m.add_type_or_value(Instruction::new(Opcode::TypeVoid).with_result(VOID));
    m.add_type_or_value(
        Instruction::new(Opcode::TypeFunction)
            .with_result(FN_VOID)
            .with_operand(Operand::Id(VOID)),
    );
    m.add_type_or_value(Instruction::new(Opcode::TypeBool).with_result(BOOL));
    m.add_type_or_value(Instruction::new(Opcode::ConstantTrue).with_result_type(BOOL).with_result(TRUE));
    m.add_type_or_value(Instruction::new(Opcode::ConstantFalse).with_result_type(BOOL).with_result(FALSE));
    m.add_type_or_value(
        Instruction::new(Opcode::TypeInt)
            .with_result(INT)
            .with_operands(vec![Operand::Literal(32), Operand::Literal(1)]),
    );
    m.add_type_or_value(Instruction::new(Opcode::TypePointer).with_result(PTR_INT).with_operands(vec![
        Operand::Literal(StorageClass::Function.to_literal()),
        Operand::Id(INT),
    ]));
    for (id, value) in [(ZERO, 0), (ONE, 1), (TWO, 2)] {
        m.add_type_or_value(
            Instruction::new(Opcode::Constant)
                .with_result_type(INT)
                .with_result(id)
                .with_operand(Operand::Literal(value)),
        );
    }
    m.add_type_or_value(
        Instruction::new(Opcode::TypePointer)
            .with_result(PTR_PRIVATE_INT)
            .with_operands(vec![
                Operand::Literal(StorageClass::Private.to_literal()),
                Operand::Id(INT),
            ]),
    );
    m.add_type_or_value(
        Instruction::new(Opcode::TypeFunction)
            .with_result(FN_INT_INT)
            .with_operands(vec![Operand::Id(INT), Operand::Id(INT)]),
    );
    m.add_global(Instruction::variable(PTR_PRIVATE_INT, GLOBAL, StorageClass::Private, Some(ZERO)));
    m
}

pub fn single_function(blocks: Vec<BasicBlock>) -> Module {
    let mut m = declarations();
    let mut main = Function::new(MAIN, VOID, FN_VOID);
    for block in blocks {
        main.add_block(block);
    }
    m.add_function(main);
    m
}

/// entry -> {left, right} -> merge, with a phi at the merge
pub fn diamond_module() -> Module {
    single_function(vec![
        BasicBlock::with_instructions(
            ENTRY,
            vec![
                Instruction::variable(PTR_INT, VAR, StorageClass::Function, None),
                Instruction::store(VAR, ONE),
                Instruction::load(INT, 41, VAR),
                Instruction::op(Opcode::IAdd, INT, 42, &[41, ONE]),
                Instruction::selection_merge(MERGE),
                Instruction::branch_conditional(TRUE, LEFT, RIGHT),
            ],
        ),
        BasicBlock::with_instructions(
            LEFT,
            vec![
                Instruction::op(Opcode::ISub, INT, 43, &[42, ONE]),
                Instruction::branch(MERGE),
            ],
        ),
        BasicBlock::with_instructions(
            RIGHT,
            vec![
                Instruction::op(Opcode::IMul, INT, 44, &[42, TWO]),
                Instruction::branch(MERGE),
            ],
        ),
        BasicBlock::with_instructions(
            MERGE,
            vec![
                Instruction::phi(INT, 45, &[(43, LEFT), (44, RIGHT)]),
                Instruction::store(VAR, 45),
                Instruction::return_void(),
            ],
        ),
    ])
}

/// entry -> header -> body -> body2 -> continue -> header, header -> merge
pub fn loop_module() -> Module {
    single_function(vec![
        BasicBlock::with_instructions(
            ENTRY,
            vec![
                Instruction::variable(PTR_INT, VAR, StorageClass::Function, None),
                Instruction::branch(HEADER),
            ],
        ),
        BasicBlock::with_instructions(
            HEADER,
            vec![
                Instruction::phi(INT, 41, &[(ZERO, ENTRY), (45, CONTINUE)]),
                Instruction::loop_merge(LOOP_MERGE, CONTINUE),
                Instruction::branch_conditional(TRUE, BODY, LOOP_MERGE),
            ],
        ),
        BasicBlock::with_instructions(
            BODY,
            vec![
                Instruction::op(Opcode::IAdd, INT, 42, &[41, ONE]),
                Instruction::branch(BODY2),
            ],
        ),
        BasicBlock::with_instructions(
            BODY2,
            vec![Instruction::store(VAR, 42), Instruction::branch(CONTINUE)],
        ),
        BasicBlock::with_instructions(
            CONTINUE,
            vec![
                Instruction::op(Opcode::IAdd, INT, 45, &[42, ONE]),
                Instruction::branch(HEADER),
            ],
        ),
        BasicBlock::with_instructions(
            LOOP_MERGE,
            vec![
                Instruction::phi(INT, 46, &[(41, HEADER)]),
                Instruction::store(VAR, 46),
                Instruction::return_void(),
            ],
        ),
    ])
}

/// entry -> 31 -> 32, where 31 has a single-entry phi
pub fn chain_module() -> Module {
    single_function(vec![
        BasicBlock::with_instructions(
            ENTRY,
            vec![
                Instruction::variable(PTR_INT, VAR, StorageClass::Function, None),
                Instruction::op(Opcode::IAdd, INT, 41, &[ONE, TWO]),
                Instruction::branch(31),
            ],
        ),
        BasicBlock::with_instructions(
            31,
            vec![
                Instruction::phi(INT, 42, &[(41, ENTRY)]),
                Instruction::op(Opcode::IAdd, INT, 43, &[42, ONE]),
                Instruction::branch(32),
            ],
        ),
        BasicBlock::with_instructions(
            32,
            vec![Instruction::store(VAR, 43), Instruction::return_void()],
        ),
    ])
}

/// A block of loads, stores and a barrier over two local variables
pub fn memory_module() -> Module {
    single_function(vec![BasicBlock::with_instructions(
        ENTRY,
        vec![
            Instruction::variable(PTR_INT, VAR, StorageClass::Function, None),
            Instruction::variable(PTR_INT, 41, StorageClass::Function, None),
            Instruction::load(INT, 42, VAR),
            Instruction::load(INT, 43, VAR),
            Instruction::store(VAR, ONE),
            Instruction::store(VAR, TWO),
            Instruction::store(41, ONE),
            Instruction::new(Opcode::ControlBarrier),
            Instruction::load(INT, 44, 41),
            Instruction::op(Opcode::IAdd, INT, 45, &[44, ONE]),
            Instruction::return_void(),
        ],
    )])
}

/// `main` calls `callee(int) -> int`, whose body holds a selection and a
/// local variable
pub fn call_module() -> Module {
    let mut m = single_function(vec![
        BasicBlock::with_instructions(
            ENTRY,
            vec![
                Instruction::variable(PTR_INT, VAR, StorageClass::Function, None),
                Instruction::store(VAR, ONE),
                Instruction::function_call(INT, 41, CALLEE, &[TWO]),
                Instruction::store(VAR, 41),
                Instruction::branch(31),
            ],
        ),
        BasicBlock::with_instructions(
            31,
            vec![Instruction::load(INT, 42, VAR), Instruction::return_void()],
        ),
    ]);

    let mut callee = Function::new(CALLEE, INT, FN_INT_INT);
    callee.add_param(INT, 50);
    callee.add_block(BasicBlock::with_instructions(
        60,
        vec![
            Instruction::variable(PTR_INT, 61, StorageClass::Function, Some(ONE)),
            Instruction::load(INT, 62, 61),
            Instruction::op(Opcode::IAdd, INT, 63, &[62, 50]),
            Instruction::selection_merge(66),
            Instruction::branch_conditional(TRUE, 65, 66),
        ],
    ));
    callee.add_block(BasicBlock::with_instructions(
        65,
        vec![
            Instruction::op(Opcode::IMul, INT, 67, &[63, TWO]),
            Instruction::branch(66),
        ],
    ));
    callee.add_block(BasicBlock::with_instructions(
        66,
        vec![
            Instruction::phi(INT, 68, &[(63, 60), (67, 65)]),
            Instruction::return_value(68),
        ],
    ));
    m.add_function(callee);
    m
}

pub fn context_for(ir: &IrContext) -> TransformationContext {
    TransformationContext::for_module(ir.module())
}

pub fn assert_valid(ir: &IrContext) {
    if let Err(e) = validation::validate_context(ir) {
        panic!("module is invalid: {e}\n{:#?}", ir.module());
    }
}

/// Check, apply and validate
pub fn apply_and_validate(t: &dyn Transformation, ir: &mut IrContext, ctx: &mut TransformationContext) {
    assert_valid(ir);
    assert!(t.is_applicable(ir, ctx), "{t:?} should be applicable");
    t.apply(ir, ctx).unwrap();
    assert_valid(ir);
}

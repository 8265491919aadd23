//! The module level of the IR: members, functions and exports.

use crate::{
    intern::InternedString,
    ir::{Function, FunctionId, ModuleMemberId},
};

/// The concrete kind of a module member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMemberData {
    /// An import of another module, by name.
    Import { name: InternedString },
    /// A variable at module scope.
    Variable { name: InternedString },
    /// A function of this module.
    Function { id: FunctionId },
}

#[derive(Debug)]
pub struct ModuleMember {
    pub data: ModuleMemberData,
    pub exported: bool,
    /// The exported name; valid for exported members only.
    pub name: InternedString,
}

/// A module lowered to IR.
#[derive(Debug)]
pub struct Module {
    pub name: InternedString,
    members: Vec<ModuleMember>,
    functions: Vec<Function>,
    /// The module initializer, if module-level state requires one.
    pub init: Option<ModuleMemberId>,
}

impl Module {
    #[must_use]
    pub fn new(name: InternedString) -> Self {
        Self {
            name,
            members: Vec::new(),
            functions: Vec::new(),
            init: None,
        }
    }

    pub fn make_member(&mut self, member: ModuleMember) -> ModuleMemberId {
        let id = ModuleMemberId(u32::try_from(self.members.len()).expect("member id overflow"));
        self.members.push(member);
        id
    }

    pub fn make_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId(u32::try_from(self.functions.len()).expect("function id overflow"));
        self.functions.push(function);
        id
    }

    #[must_use]
    pub fn member(&self, id: ModuleMemberId) -> &ModuleMember {
        &self.members[id.index()]
    }

    pub fn member_mut(&mut self, id: ModuleMemberId) -> &mut ModuleMember {
        &mut self.members[id.index()]
    }

    #[must_use]
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = ModuleMemberId> + '_ {
        (0..self.members.len()).map(|i| ModuleMemberId(i as u32))
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        (0..self.functions.len()).map(|i| FunctionId(i as u32))
    }
}

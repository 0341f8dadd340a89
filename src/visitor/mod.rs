pub mod attributionvisitor;
pub mod neighborvisitor;
pub mod scorevisitor;
pub mod visitor;

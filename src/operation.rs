//! The closed set of request kinds and their handler bindings.
//!
//! Every [`Operation`] is bound to exactly one [`Handler`] by an exhaustive
//! `match`, so adding a variant without a binding fails to compile.

use crate::backend::{Backend, HandlerResult, Reply};
use serde::{Deserialize, Serialize};

/// Message returned when a client sends the disconnect sentinel.
pub const DISCONNECT_MESSAGE: &str = "Disconnected";

/// A request kind, encoded on the wire as its SCREAMING_SNAKE_CASE name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    // Stocks
    CreateStock,
    ReadStockData,
    UpdateStock,
    DeleteStock,

    // Companies
    CreateCompany,
    ReadCompanyData,
    UpdateCompany,
    DeleteCompany,

    // Users
    CreateUser,
    ReadUser,
    UpdateUser,
    DeleteUser,

    // Bulk reads
    GetAllCompanies,
    GetAllStocks,
    GetAllUsers,
    GetAllRoles,
    GetAllStocksWithNoCompany,

    // Stock/company relationship
    GetStocksByCompany,
    GetCompanyByStock,
    JoinStockCompany,
    SeparateStockCompany,

    // Portfolio
    AddUserStock,
    GetUserStock,
    UpdateUserStock,
    DeleteUserStock,
    GetAllUserStocks,
    GetAllUserStockIds,
    GetUserAccount,
    SetUserAccount,
    GetStockAvailableAmount,

    // Session
    Login,
    Register,
    Disconnect,
}

/// A bound operation handler: opaque payload in, reply or error out.
pub type Handler = fn(&dyn Backend, Option<&str>) -> HandlerResult;

impl Operation {
    /// Every operation, in declaration order.
    #[cfg(test)]
    pub const ALL: [Operation; 33] = [
        Operation::CreateStock,
        Operation::ReadStockData,
        Operation::UpdateStock,
        Operation::DeleteStock,
        Operation::CreateCompany,
        Operation::ReadCompanyData,
        Operation::UpdateCompany,
        Operation::DeleteCompany,
        Operation::CreateUser,
        Operation::ReadUser,
        Operation::UpdateUser,
        Operation::DeleteUser,
        Operation::GetAllCompanies,
        Operation::GetAllStocks,
        Operation::GetAllUsers,
        Operation::GetAllRoles,
        Operation::GetAllStocksWithNoCompany,
        Operation::GetStocksByCompany,
        Operation::GetCompanyByStock,
        Operation::JoinStockCompany,
        Operation::SeparateStockCompany,
        Operation::AddUserStock,
        Operation::GetUserStock,
        Operation::UpdateUserStock,
        Operation::DeleteUserStock,
        Operation::GetAllUserStocks,
        Operation::GetAllUserStockIds,
        Operation::GetUserAccount,
        Operation::SetUserAccount,
        Operation::GetStockAvailableAmount,
        Operation::Login,
        Operation::Register,
        Operation::Disconnect,
    ];

    /// Human-readable description used in logs.
    pub fn description(self) -> &'static str {
        match self {
            Operation::CreateStock => "create stock",
            Operation::ReadStockData => "read stock",
            Operation::UpdateStock => "update stock",
            Operation::DeleteStock => "delete stock",
            Operation::CreateCompany => "create company",
            Operation::ReadCompanyData => "read company",
            Operation::UpdateCompany => "update company",
            Operation::DeleteCompany => "delete company",
            Operation::CreateUser => "create user",
            Operation::ReadUser => "read user",
            Operation::UpdateUser => "update user",
            Operation::DeleteUser => "delete user",
            Operation::GetAllCompanies => "list companies",
            Operation::GetAllStocks => "list stocks",
            Operation::GetAllUsers => "list users",
            Operation::GetAllRoles => "list roles",
            Operation::GetAllStocksWithNoCompany => "list unassigned stocks",
            Operation::GetStocksByCompany => "list company stocks",
            Operation::GetCompanyByStock => "find company of stock",
            Operation::JoinStockCompany => "attach stock to company",
            Operation::SeparateStockCompany => "detach stock from company",
            Operation::AddUserStock => "add portfolio holding",
            Operation::GetUserStock => "read portfolio holding",
            Operation::UpdateUserStock => "update portfolio holding",
            Operation::DeleteUserStock => "delete portfolio holding",
            Operation::GetAllUserStocks => "list user portfolio",
            Operation::GetAllUserStockIds => "list all holding pairs",
            Operation::GetUserAccount => "read account balance",
            Operation::SetUserAccount => "set account balance",
            Operation::GetStockAvailableAmount => "read available amount",
            Operation::Login => "login",
            Operation::Register => "register",
            Operation::Disconnect => "disconnect",
        }
    }

    /// True for operations that only read state.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Operation::ReadStockData
                | Operation::ReadCompanyData
                | Operation::ReadUser
                | Operation::GetAllCompanies
                | Operation::GetAllStocks
                | Operation::GetAllUsers
                | Operation::GetAllRoles
                | Operation::GetAllStocksWithNoCompany
                | Operation::GetStocksByCompany
                | Operation::GetCompanyByStock
                | Operation::GetUserStock
                | Operation::GetAllUserStocks
                | Operation::GetAllUserStockIds
                | Operation::GetUserAccount
                | Operation::GetStockAvailableAmount
        )
    }

    /// True for operations that change state.
    pub fn is_modify(self) -> bool {
        matches!(
            self,
            Operation::CreateStock
                | Operation::UpdateStock
                | Operation::DeleteStock
                | Operation::CreateCompany
                | Operation::UpdateCompany
                | Operation::DeleteCompany
                | Operation::CreateUser
                | Operation::UpdateUser
                | Operation::DeleteUser
                | Operation::JoinStockCompany
                | Operation::SeparateStockCompany
                | Operation::AddUserStock
                | Operation::UpdateUserStock
                | Operation::DeleteUserStock
                | Operation::SetUserAccount
        )
    }

    pub fn is_disconnect(self) -> bool {
        self == Operation::Disconnect
    }
}

/// Resolve the handler bound to `op`.
pub fn handler_for(op: Operation) -> Handler {
    match op {
        Operation::CreateStock => |b, p| b.create_stock(p),
        Operation::ReadStockData => |b, p| b.read_stock(p),
        Operation::UpdateStock => |b, p| b.update_stock(p),
        Operation::DeleteStock => |b, p| b.delete_stock(p),

        Operation::CreateCompany => |b, p| b.create_company(p),
        Operation::ReadCompanyData => |b, p| b.read_company(p),
        Operation::UpdateCompany => |b, p| b.update_company(p),
        Operation::DeleteCompany => |b, p| b.delete_company(p),

        Operation::CreateUser | Operation::Register => |b, p| b.register(p),
        Operation::ReadUser => |b, p| b.read_user(p),
        Operation::UpdateUser => |b, p| b.update_user(p),
        Operation::DeleteUser => |b, p| b.delete_user(p),

        Operation::GetAllCompanies => |b, _| b.all_companies(),
        Operation::GetAllStocks => |b, _| b.all_stocks(),
        Operation::GetAllUsers => |b, _| b.all_users(),
        Operation::GetAllRoles => |b, _| b.all_roles(),
        Operation::GetAllStocksWithNoCompany => |b, _| b.unassigned_stocks(),

        Operation::GetStocksByCompany => |b, p| b.company_stocks(p),
        Operation::GetCompanyByStock => |b, p| b.stock_company(p),
        Operation::JoinStockCompany => |b, p| b.join_stock_company(p),
        Operation::SeparateStockCompany => |b, p| b.separate_stock_company(p),

        Operation::AddUserStock => |b, p| b.add_holding(p),
        Operation::GetUserStock => |b, p| b.read_holding(p),
        Operation::UpdateUserStock => |b, p| b.update_holding(p),
        Operation::DeleteUserStock => |b, p| b.delete_holding(p),
        Operation::GetAllUserStocks => |b, p| b.user_holdings(p),
        Operation::GetAllUserStockIds => |b, _| b.all_holding_pairs(),
        Operation::GetUserAccount => |b, p| b.read_account(p),
        Operation::SetUserAccount => |b, p| b.set_account(p),
        Operation::GetStockAvailableAmount => |b, p| b.available_amount(p),

        Operation::Login => |b, p| b.login(p),
        Operation::Disconnect => |_, _| Ok(Reply::message(DISCONNECT_MESSAGE)),
    }
}

/// Run the handler bound to `op` against `backend`.
pub fn dispatch(backend: &dyn Backend, op: Operation, payload: Option<&str>) -> HandlerResult {
    handler_for(op)(backend, payload)
}

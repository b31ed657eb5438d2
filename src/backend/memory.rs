//! In-memory backend.
//!
//! Keeps every table behind one `RwLock`, which is only held for the
//! duration of a single operation and never across I/O.

use super::model::{Company, Id, IdRef, Pair, Role, Stock, User};
use super::{decode, Backend, HandlerError, HandlerResult, Reply};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Roles present in a fresh backend.
pub const DEFAULT_ROLES: [&str; 2] = ["ADMIN", "USER"];

#[derive(Debug, Default)]
struct Tables {
    next_id: Id,
    stocks: BTreeMap<Id, Stock>,
    companies: BTreeMap<Id, Company>,
    roles: BTreeMap<Id, Role>,
    users: BTreeMap<Id, User>,
    /// stock id -> company id
    stock_company: HashMap<Id, Id>,
    /// (user id, stock id) -> amount held
    holdings: BTreeMap<(Id, Id), u32>,
    /// user id -> balance
    accounts: HashMap<Id, f64>,
}

impl Tables {
    fn allocate_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn user_by_name(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    fn held(&self, stock_id: Id) -> u32 {
        self.holdings
            .iter()
            .filter(|((_, s), _)| *s == stock_id)
            .map(|(_, amount)| *amount)
            .sum()
    }

    fn available(&self, stock_id: Id) -> Option<u32> {
        let stock = self.stocks.get(&stock_id)?;
        Some(stock.amount.saturating_sub(self.held(stock_id)))
    }

    fn require_stock(&self, id: Id) -> Result<&Stock, HandlerError> {
        self.stocks
            .get(&id)
            .ok_or_else(|| HandlerError::business("Stock not found"))
    }

    fn require_company(&self, id: Id) -> Result<&Company, HandlerError> {
        self.companies
            .get(&id)
            .ok_or_else(|| HandlerError::business("Company not found"))
    }

    fn require_user(&self, id: Id) -> Result<&User, HandlerError> {
        self.users
            .get(&id)
            .ok_or_else(|| HandlerError::business("User not found"))
    }
}

/// Backend holding all entities in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a backend seeded with [`DEFAULT_ROLES`].
    pub fn new() -> Self {
        let mut tables = Tables::default();
        for name in DEFAULT_ROLES {
            let id = tables.allocate_id();
            tables.roles.insert(
                id,
                Role {
                    id: Some(id),
                    name: name.to_string(),
                },
            );
        }
        info!(roles = DEFAULT_ROLES.len(), "Initializing in-memory backend");
        MemoryBackend {
            tables: RwLock::new(tables),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, HandlerError> {
        self.tables
            .read()
            .map_err(|_| HandlerError::Internal("backend lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, HandlerError> {
        self.tables
            .write()
            .map_err(|_| HandlerError::Internal("backend lock poisoned".into()))
    }
}

impl Backend for MemoryBackend {
    fn create_stock(&self, payload: Option<&str>) -> HandlerResult {
        let mut stock: Stock = decode(payload, "Invalid stock data")?;
        if !stock.is_valid() {
            return Err(HandlerError::business("Invalid stock data"));
        }
        let mut tables = self.write()?;
        if tables.stocks.values().any(|s| s.ticket == stock.ticket) {
            return Err(HandlerError::business("Stock with this ticket already exists"));
        }
        let id = tables.allocate_id();
        stock.id = Some(id);
        tables.stocks.insert(id, stock.clone());
        debug!(id, ticket = %stock.ticket, "Stock created");
        Reply::json("Stock created", &stock)
    }

    fn read_stock(&self, payload: Option<&str>) -> HandlerResult {
        let ticket: String = decode(payload, "Invalid ticket format")?;
        let tables = self.read()?;
        let stock = tables
            .stocks
            .values()
            .find(|s| s.ticket == ticket)
            .ok_or_else(|| HandlerError::business("Stock not found"))?;
        Reply::json("Stock data retrieved", stock)
    }

    fn update_stock(&self, payload: Option<&str>) -> HandlerResult {
        let stock: Stock = decode(payload, "Invalid stock data")?;
        let id = stock
            .id
            .ok_or_else(|| HandlerError::business("Invalid stock data"))?;
        if !stock.is_valid() {
            return Err(HandlerError::business("Invalid stock data"));
        }
        let mut tables = self.write()?;
        tables.require_stock(id)?;
        if tables
            .stocks
            .values()
            .any(|s| s.ticket == stock.ticket && s.id != Some(id))
        {
            return Err(HandlerError::business("Stock with this ticket already exists"));
        }
        tables.stocks.insert(id, stock);
        Ok(Reply::message("Stock updated"))
    }

    fn delete_stock(&self, payload: Option<&str>) -> HandlerResult {
        let id: Id = decode(payload, "Invalid stock id")?;
        let mut tables = self.write()?;
        tables
            .stocks
            .remove(&id)
            .ok_or_else(|| HandlerError::business("Stock not found"))?;
        tables.stock_company.remove(&id);
        tables.holdings.retain(|(_, stock_id), _| *stock_id != id);
        Ok(Reply::message("Stock deleted"))
    }

    fn create_company(&self, payload: Option<&str>) -> HandlerResult {
        let mut company: Company = decode(payload, "Invalid company data")?;
        if !company.is_valid() {
            return Err(HandlerError::business("Invalid company data"));
        }
        let mut tables = self.write()?;
        if tables.companies.values().any(|c| c.name == company.name) {
            return Err(HandlerError::business("Company with this name already exists"));
        }
        let id = tables.allocate_id();
        company.id = Some(id);
        tables.companies.insert(id, company.clone());
        Reply::json("Company created", &company)
    }

    fn read_company(&self, payload: Option<&str>) -> HandlerResult {
        let name: String = decode(payload, "Invalid company name")?;
        let tables = self.read()?;
        let company = tables
            .companies
            .values()
            .find(|c| c.name == name)
            .ok_or_else(|| HandlerError::business("Company not found"))?;
        Reply::json("Company data retrieved", company)
    }

    fn update_company(&self, payload: Option<&str>) -> HandlerResult {
        let company: Company = decode(payload, "Invalid company data")?;
        let id = company
            .id
            .ok_or_else(|| HandlerError::business("Invalid company data"))?;
        if !company.is_valid() {
            return Err(HandlerError::business("Invalid company data"));
        }
        let mut tables = self.write()?;
        tables.require_company(id)?;
        tables.companies.insert(id, company);
        Ok(Reply::message("Company updated"))
    }

    fn delete_company(&self, payload: Option<&str>) -> HandlerResult {
        let id: Id = decode(payload, "Invalid company id")?;
        let mut tables = self.write()?;
        tables
            .companies
            .remove(&id)
            .ok_or_else(|| HandlerError::business("Company not found"))?;
        tables.stock_company.retain(|_, company_id| *company_id != id);
        Ok(Reply::message("Company deleted"))
    }

    fn register(&self, payload: Option<&str>) -> HandlerResult {
        let mut user: User = decode(payload, "Invalid user data")?;
        if !user.is_fully_valid() {
            return Err(HandlerError::business("Registration failed: incomplete data"));
        }
        let mut tables = self.write()?;
        if tables.user_by_name(&user.username).is_some() {
            return Err(HandlerError::business(
                "Registration failed: username already taken",
            ));
        }
        let wanted = user.role.as_ref().map(|r| r.name.clone()).unwrap_or_default();
        let role = tables
            .roles
            .values()
            .find(|r| r.name == wanted)
            .cloned()
            .ok_or_else(|| HandlerError::business("Registration failed: role not found"))?;

        let person_id = tables.allocate_id();
        let id = tables.allocate_id();
        if let Some(person) = user.person.as_mut() {
            person.id = Some(person_id);
        }
        user.role = Some(role);
        user.id = Some(id);
        tables.users.insert(id, user.clone());
        info!(id, username = %user.username, "User registered");
        Reply::json("Registration successful", &user)
    }

    fn read_user(&self, payload: Option<&str>) -> HandlerResult {
        let username: String = decode(payload, "Invalid username")?;
        let tables = self.read()?;
        let user = tables
            .user_by_name(&username)
            .ok_or_else(|| HandlerError::business("User not found"))?;
        Reply::json("User retrieved", user)
    }

    fn update_user(&self, payload: Option<&str>) -> HandlerResult {
        let pair: Pair<User, User> = decode(payload, "Invalid user data")?;
        let (target, actor) = (pair.key, pair.value);
        let (Some(target_id), Some(actor_id)) = (target.id, actor.id) else {
            return Err(HandlerError::business("Invalid user data"));
        };

        let mut tables = self.write()?;
        if !tables.users.contains_key(&target_id) || !tables.users.contains_key(&actor_id) {
            return Err(HandlerError::business("Some of the users don't exist"));
        }
        if tables
            .user_by_name(&target.username)
            .is_some_and(|u| u.id != Some(target_id))
        {
            return Err(HandlerError::business("Update failed: username already taken"));
        }
        if !target.is_fully_valid() {
            return Err(HandlerError::business("Update failed: invalid user data"));
        }
        let wanted = target.role.as_ref().map(|r| r.name.clone()).unwrap_or_default();
        let role = tables
            .roles
            .values()
            .find(|r| r.name == wanted)
            .cloned()
            .ok_or_else(|| HandlerError::business("Update failed: role not found"))?;

        let mut updated = target;
        updated.role = Some(role);
        tables.users.insert(target_id, updated);

        if target_id == actor_id {
            Ok(Reply::message(
                "User updated. It was your user, so you need to login again.",
            ))
        } else {
            Ok(Reply::message("User updated"))
        }
    }

    fn delete_user(&self, payload: Option<&str>) -> HandlerResult {
        let username: String = decode(payload, "Invalid username")?;
        let mut tables = self.write()?;
        let id = tables
            .user_by_name(&username)
            .and_then(|u| u.id)
            .ok_or_else(|| HandlerError::business("User not found"))?;
        tables.users.remove(&id);
        tables.holdings.retain(|(user_id, _), _| *user_id != id);
        tables.accounts.remove(&id);
        Ok(Reply::message("User deleted"))
    }

    fn all_companies(&self) -> HandlerResult {
        let tables = self.read()?;
        let companies: Vec<&Company> = tables.companies.values().collect();
        Reply::json("Companies retrieved", &companies)
    }

    fn all_stocks(&self) -> HandlerResult {
        let tables = self.read()?;
        let stocks: Vec<&Stock> = tables.stocks.values().collect();
        Reply::json("Stocks retrieved", &stocks)
    }

    fn all_users(&self) -> HandlerResult {
        let tables = self.read()?;
        let users: Vec<&User> = tables.users.values().collect();
        Reply::json("Users retrieved", &users)
    }

    fn all_roles(&self) -> HandlerResult {
        let tables = self.read()?;
        let roles: Vec<&Role> = tables.roles.values().collect();
        Reply::json("Roles retrieved", &roles)
    }

    fn unassigned_stocks(&self) -> HandlerResult {
        let tables = self.read()?;
        let stocks: Vec<&Stock> = tables
            .stocks
            .iter()
            .filter(|(id, _)| !tables.stock_company.contains_key(*id))
            .map(|(_, stock)| stock)
            .collect();
        Reply::json("Unassigned stocks retrieved", &stocks)
    }

    fn company_stocks(&self, payload: Option<&str>) -> HandlerResult {
        let company: IdRef = decode(payload, "Invalid company data")?;
        let tables = self.read()?;
        tables.require_company(company.id)?;
        let stocks: Vec<&Stock> = tables
            .stocks
            .iter()
            .filter(|(id, _)| tables.stock_company.get(*id) == Some(&company.id))
            .map(|(_, stock)| stock)
            .collect();
        Reply::json("Company stocks retrieved", &stocks)
    }

    fn stock_company(&self, payload: Option<&str>) -> HandlerResult {
        let stock: IdRef = decode(payload, "Invalid stock data")?;
        let tables = self.read()?;
        tables.require_stock(stock.id)?;
        let company = tables
            .stock_company
            .get(&stock.id)
            .and_then(|company_id| tables.companies.get(company_id))
            .ok_or_else(|| HandlerError::business("Company not found"))?;
        Reply::json("Company data retrieved", company)
    }

    fn join_stock_company(&self, payload: Option<&str>) -> HandlerResult {
        let pair: Pair<IdRef, IdRef> = decode(payload, "Invalid stock/company data")?;
        let (stock_id, company_id) = (pair.key.id, pair.value.id);
        let mut tables = self.write()?;
        tables.require_stock(stock_id)?;
        tables.require_company(company_id)?;
        tables.stock_company.insert(stock_id, company_id);
        Ok(Reply::message("Stock attached to company"))
    }

    fn separate_stock_company(&self, payload: Option<&str>) -> HandlerResult {
        let pair: Pair<IdRef, IdRef> = decode(payload, "Invalid stock/company data")?;
        let stock_id = pair.key.id;
        let mut tables = self.write()?;
        tables.require_stock(stock_id)?;
        if tables.stock_company.remove(&stock_id).is_none() {
            return Err(HandlerError::business("Stock is not attached to a company"));
        }
        Ok(Reply::message("Stock detached from company"))
    }

    fn add_holding(&self, payload: Option<&str>) -> HandlerResult {
        let data: Pair<Pair<IdRef, u32>, Id> =
            decode(payload, "Invalid data format for saving stock")?;
        let (stock_id, amount, user_id) = (data.key.key.id, data.key.value, data.value);
        if amount == 0 {
            return Err(HandlerError::business("Amount must be positive"));
        }
        let mut tables = self.write()?;
        tables.require_user(user_id)?;
        tables.require_stock(stock_id)?;
        if tables.available(stock_id).unwrap_or(0) < amount {
            return Err(HandlerError::business("Not enough stock available"));
        }
        *tables.holdings.entry((user_id, stock_id)).or_insert(0) += amount;
        Ok(Reply::message("Stock saved successfully"))
    }

    fn read_holding(&self, payload: Option<&str>) -> HandlerResult {
        let data: Pair<Id, Id> = decode(payload, "Invalid data format for retrieving stock")?;
        let (stock_id, user_id) = (data.key, data.value);
        let tables = self.read()?;
        let amount = tables
            .holdings
            .get(&(user_id, stock_id))
            .copied()
            .ok_or_else(|| HandlerError::business("Stock not found in portfolio"))?;
        let stock = tables.require_stock(stock_id)?;
        Reply::json("Stock retrieved successfully", &Pair::new(stock, amount))
    }

    fn update_holding(&self, payload: Option<&str>) -> HandlerResult {
        let data: Pair<Pair<IdRef, u32>, Id> =
            decode(payload, "Invalid data format for updating stock")?;
        let (stock_id, sold, user_id) = (data.key.key.id, data.key.value, data.value);
        let mut tables = self.write()?;
        let current = tables
            .holdings
            .get(&(user_id, stock_id))
            .copied()
            .ok_or_else(|| HandlerError::business("Stock not found in portfolio"))?;
        if sold >= current {
            tables.holdings.remove(&(user_id, stock_id));
        } else {
            tables.holdings.insert((user_id, stock_id), current - sold);
        }
        Ok(Reply::message("Stock updated successfully"))
    }

    fn delete_holding(&self, payload: Option<&str>) -> HandlerResult {
        let (user_id, stock_id): (Id, Id) =
            decode(payload, "Invalid data format for deleting stock")?;
        let mut tables = self.write()?;
        tables
            .holdings
            .remove(&(user_id, stock_id))
            .ok_or_else(|| HandlerError::business("Stock not found in portfolio"))?;
        Ok(Reply::message("Stock deleted successfully"))
    }

    fn user_holdings(&self, payload: Option<&str>) -> HandlerResult {
        let user_id: Id = decode(payload, "Invalid user ID")?;
        let tables = self.read()?;
        let holdings: Vec<Pair<&Stock, u32>> = tables
            .holdings
            .range((user_id, Id::MIN)..=(user_id, Id::MAX))
            .filter_map(|((_, stock_id), amount)| {
                tables.stocks.get(stock_id).map(|s| Pair::new(s, *amount))
            })
            .collect();
        Reply::json("User stocks retrieved successfully", &holdings)
    }

    fn all_holding_pairs(&self) -> HandlerResult {
        let tables = self.read()?;
        let pairs: Vec<Pair<Id, Id>> = tables
            .holdings
            .keys()
            .map(|(user_id, stock_id)| Pair::new(*user_id, *stock_id))
            .collect();
        Reply::json("All user-stock pairs retrieved", &pairs)
    }

    fn read_account(&self, payload: Option<&str>) -> HandlerResult {
        let user_id: Id = decode(payload, "Invalid user ID")?;
        let tables = self.read()?;
        let balance = tables
            .accounts
            .get(&user_id)
            .copied()
            .ok_or_else(|| HandlerError::business("Account not found"))?;
        Reply::json("Account was sent", &balance)
    }

    fn set_account(&self, payload: Option<&str>) -> HandlerResult {
        let data: Pair<Id, f64> = decode(payload, "Invalid data format for setting account")?;
        if !data.value.is_finite() {
            return Err(HandlerError::business("Invalid data format for setting account"));
        }
        let mut tables = self.write()?;
        tables.require_user(data.key)?;
        // Balances are kept to the cent.
        let balance = (data.value * 100.0).round() / 100.0;
        tables.accounts.insert(data.key, balance);
        Ok(Reply::message("Account updated successfully"))
    }

    fn available_amount(&self, payload: Option<&str>) -> HandlerResult {
        let stock_id: Id = decode(payload, "Invalid stock id")?;
        let tables = self.read()?;
        let amount = tables
            .available(stock_id)
            .ok_or_else(|| HandlerError::business("Stock not found"))?;
        Reply::json("Amount was sent", &amount)
    }

    fn login(&self, payload: Option<&str>) -> HandlerResult {
        let user: User = decode(payload, "Invalid user data")?;
        if !user.is_valid() {
            return Err(HandlerError::business("Login failed: missing username or password"));
        }
        let tables = self.read()?;
        match tables.user_by_name(&user.username) {
            Some(existing) if existing.password_hash == user.password_hash => {
                Reply::json("Login successful", existing)
            }
            _ => Err(HandlerError::business("Login failed: wrong username or password")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn call(result: HandlerResult) -> Value {
        let reply = result.unwrap();
        serde_json::from_str(reply.payload.as_deref().unwrap_or("null")).unwrap()
    }

    fn business(result: HandlerResult) -> String {
        match result {
            Err(HandlerError::Business(message)) => message,
            other => panic!("expected business error, got {:?}", other),
        }
    }

    fn arg(value: Value) -> String {
        value.to_string()
    }

    fn register(backend: &MemoryBackend, username: &str) -> Id {
        let user = call(backend.register(Some(&arg(json!({
            "username": username,
            "passwordHash": "secret",
            "role": {"name": "USER"},
            "person": {"firstName": "Ann", "lastName": "Lee"}
        })))));
        user["id"].as_u64().unwrap() as Id
    }

    fn stock(backend: &MemoryBackend, ticket: &str, amount: u32) -> Id {
        let stock = call(backend.create_stock(Some(&arg(json!({
            "ticket": ticket, "price": 12.5, "amount": amount
        })))));
        stock["id"].as_u64().unwrap() as Id
    }

    #[test]
    fn test_seeded_roles() {
        let backend = MemoryBackend::new();
        let roles = call(backend.all_roles());
        let names: Vec<&str> = roles
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, DEFAULT_ROLES);
    }

    #[test]
    fn test_stock_crud() {
        let backend = MemoryBackend::new();
        let id = stock(&backend, "AAPL", 10);

        let found = call(backend.read_stock(Some("\"AAPL\"")));
        assert_eq!(found["id"], id);

        assert!(business(backend.create_stock(Some(&arg(json!({
            "ticket": "AAPL", "price": 1.0, "amount": 1
        })))))
        .contains("already exists"));

        backend
            .update_stock(Some(&arg(json!({
                "id": id, "ticket": "AAPL", "price": 99.0, "amount": 10
            }))))
            .unwrap();
        assert_eq!(call(backend.read_stock(Some("\"AAPL\"")))["price"], 99.0);

        backend.delete_stock(Some(&id.to_string())).unwrap();
        assert_eq!(business(backend.read_stock(Some("\"AAPL\""))), "Stock not found");
        assert_eq!(business(backend.delete_stock(Some(&id.to_string()))), "Stock not found");
    }

    #[test]
    fn test_malformed_payload_is_business_error() {
        let backend = MemoryBackend::new();
        assert!(business(backend.create_stock(Some("{not json"))).starts_with("Invalid stock data"));
        assert!(business(backend.delete_stock(None)).contains("missing data"));
    }

    #[test]
    fn test_company_relationships() {
        let backend = MemoryBackend::new();
        let stock_id = stock(&backend, "TSLA", 5);
        let company = call(backend.create_company(Some(&arg(json!({"name": "Tesla"})))));
        let company_id = company["id"].as_u64().unwrap() as Id;

        assert_eq!(call(backend.unassigned_stocks()).as_array().unwrap().len(), 1);
        assert_eq!(business(backend.stock_company(Some(&arg(json!({"id": stock_id}))))), "Company not found");

        let link = arg(json!({"key": {"id": stock_id}, "value": {"id": company_id}}));
        backend.join_stock_company(Some(&link)).unwrap();

        assert!(call(backend.unassigned_stocks()).as_array().unwrap().is_empty());
        let stocks = call(backend.company_stocks(Some(&arg(json!({"id": company_id})))));
        assert_eq!(stocks[0]["ticket"], "TSLA");
        let owner = call(backend.stock_company(Some(&arg(json!({"id": stock_id})))));
        assert_eq!(owner["name"], "Tesla");

        backend.separate_stock_company(Some(&link)).unwrap();
        assert!(business(backend.separate_stock_company(Some(&link))).contains("not attached"));

        backend.join_stock_company(Some(&link)).unwrap();
        backend.delete_company(Some(&company_id.to_string())).unwrap();
        assert_eq!(call(backend.unassigned_stocks()).as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_register_and_login() {
        let backend = MemoryBackend::new();
        register(&backend, "ann");

        assert!(business(backend.register(Some(&arg(json!({
            "username": "ann", "passwordHash": "x",
            "role": {"name": "USER"},
            "person": {"firstName": "A", "lastName": "B"}
        })))))
        .contains("already taken"));

        assert!(business(backend.register(Some(&arg(json!({
            "username": "bob", "passwordHash": "x",
            "role": {"name": "GOD"},
            "person": {"firstName": "A", "lastName": "B"}
        })))))
        .contains("role not found"));

        let user = call(backend.login(Some(&arg(json!({"username": "ann", "passwordHash": "secret"})))));
        assert_eq!(user["role"]["name"], "USER");

        assert!(business(backend.login(Some(&arg(json!({"username": "ann", "passwordHash": "nope"})))))
            .contains("wrong username or password"));
    }

    #[test]
    fn test_update_user_reports_self_edit() {
        let backend = MemoryBackend::new();
        let ann = register(&backend, "ann");
        let bob = register(&backend, "bob");

        let edit = |target: Id, actor: Id, username: &str| {
            arg(json!({
                "key": {
                    "id": target, "username": username, "passwordHash": "secret",
                    "role": {"name": "ADMIN"},
                    "person": {"firstName": "Ann", "lastName": "Lee"}
                },
                "value": {"id": actor, "username": "x", "passwordHash": "x"}
            }))
        };

        let reply = backend.update_user(Some(&edit(ann, ann, "ann2"))).unwrap();
        assert!(reply.message.contains("login again"));
        let reply = backend.update_user(Some(&edit(ann, bob, "ann3"))).unwrap();
        assert_eq!(reply.message, "User updated");
        assert!(business(backend.update_user(Some(&edit(ann, bob, "bob")))).contains("already taken"));
        assert!(business(backend.update_user(Some(&edit(999, bob, "zed")))).contains("don't exist"));

        assert_eq!(call(backend.read_user(Some("\"ann3\"")))["role"]["name"], "ADMIN");
    }

    #[test]
    fn test_portfolio_flow() {
        let backend = MemoryBackend::new();
        let user = register(&backend, "ann");
        let stock_id = stock(&backend, "NVDA", 10);
        let holding = |amount: u32| arg(json!({"key": {"key": {"id": stock_id}, "value": amount}, "value": user}));

        backend.add_holding(Some(&holding(4))).unwrap();
        backend.add_holding(Some(&holding(2))).unwrap();
        assert_eq!(call(backend.available_amount(Some(&stock_id.to_string()))), 4);
        assert!(business(backend.add_holding(Some(&holding(5)))).contains("Not enough"));

        let held = call(backend.read_holding(Some(&arg(json!({"key": stock_id, "value": user})))));
        assert_eq!(held["value"], 6);

        backend.update_holding(Some(&holding(1))).unwrap();
        let all = call(backend.user_holdings(Some(&user.to_string())));
        assert_eq!(all[0]["key"]["ticket"], "NVDA");
        assert_eq!(all[0]["value"], 5);

        let pairs = call(backend.all_holding_pairs());
        assert_eq!(pairs, json!([{"key": user, "value": stock_id}]));

        backend.update_holding(Some(&holding(50))).unwrap();
        assert!(call(backend.user_holdings(Some(&user.to_string()))).as_array().unwrap().is_empty());

        backend.add_holding(Some(&holding(1))).unwrap();
        backend.delete_holding(Some(&arg(json!([user, stock_id])))).unwrap();
        assert!(business(backend.delete_holding(Some(&arg(json!([user, stock_id]))))).contains("not found"));
    }

    #[test]
    fn test_account_rounds_to_cents() {
        let backend = MemoryBackend::new();
        let user = register(&backend, "ann");

        assert_eq!(business(backend.read_account(Some(&user.to_string()))), "Account not found");
        backend
            .set_account(Some(&arg(json!({"key": user, "value": 10.456}))))
            .unwrap();
        assert_eq!(call(backend.read_account(Some(&user.to_string()))), 10.46);
        assert!(business(backend.set_account(Some(&arg(json!({"key": 999, "value": 1.0}))))).contains("User not found"));
    }

    #[test]
    fn test_delete_user_drops_portfolio() {
        let backend = MemoryBackend::new();
        let user = register(&backend, "ann");
        let stock_id = stock(&backend, "AMD", 3);
        backend
            .add_holding(Some(&arg(json!({"key": {"key": {"id": stock_id}, "value": 3}, "value": user}))))
            .unwrap();
        assert_eq!(call(backend.available_amount(Some(&stock_id.to_string()))), 0);

        backend.delete_user(Some("\"ann\"")).unwrap();
        assert_eq!(call(backend.available_amount(Some(&stock_id.to_string()))), 3);
        assert_eq!(business(backend.read_user(Some("\"ann\""))), "User not found");
    }
}

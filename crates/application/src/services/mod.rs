mod chat_service;
mod token_service;
mod user_service;

#[cfg(test)]
mod chat_service_tests;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod user_service_tests;

pub use chat_service::{
    ChatService, ChatServiceDependencies, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use token_service::{
    ClientMeta, TokenPair, TokenPolicy, TokenService, TokenServiceDependencies,
};
pub use user_service::{RegisterUserRequest, UserService, UserServiceDependencies};

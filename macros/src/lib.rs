mod derive_message;

use derive_message::DeriveMessage;
use proc_macro::TokenStream;
use quote::ToTokens;
use syn::parse_macro_input;

/// Derive macro implementing the [Message](https://docs.rs/tether/latest/tether/message/trait.Message.html) trait.
///
/// A field marked `#[transaction_key]` becomes the message's transaction key. The field can be any type
/// implementing `TransactionKey`, such as `String`, `Arc<str>` or `Option<String>`. Without a marked field the
/// message is fire-and-forget.
///
/// On enums, each variant may mark one of its fields; variants without a marked field have no transaction key.
///
/// # Example
///
/// ```ignore
/// use tether::Message;
///
/// #[derive(Message)]
/// struct Query {
///     #[transaction_key]
///     id: String,
///     body: Vec<u8>,
/// }
///
/// #[derive(Message)]
/// enum Frame {
///     Request(#[transaction_key] String, Vec<u8>),
///     Event { payload: Vec<u8> },
/// }
/// ```
#[proc_macro_derive(Message, attributes(transaction_key))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let derive_message = parse_macro_input!(input as DeriveMessage);
    TokenStream::from(derive_message.into_token_stream())
}

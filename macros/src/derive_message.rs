use proc_macro2::TokenStream;
use quote::{format_ident, quote, ToTokens};
use syn::{
    parse::{Parse, ParseStream},
    spanned::Spanned,
    parse_quote, Data, DeriveInput, Field, Fields, GenericParam, Generics, Ident, Index, Member,
};

pub struct DeriveMessage {
    ident: Ident,
    generics: Generics,
    body: KeyLookup,
}

enum KeyLookup {
    /// No field carries a transaction key.
    None,
    /// A struct field carries the transaction key.
    Field(Member),
    /// Enum variants, each optionally carrying a transaction key field.
    Variants(Vec<TokenStream>),
}

impl ToTokens for DeriveMessage {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let Self {
            ident,
            generics,
            body,
        } = self;
        let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

        let transaction_key = match body {
            KeyLookup::None => quote! {},
            KeyLookup::Field(member) => quote! {
                #[inline]
                fn transaction_key(&self) -> ::std::option::Option<&str> {
                    ::tether::message::TransactionKey::as_transaction_key(&self.#member)
                }
            },
            KeyLookup::Variants(arms) => quote! {
                #[inline]
                fn transaction_key(&self) -> ::std::option::Option<&str> {
                    match self {
                        #( #arms )*
                    }
                }
            },
        };

        tokens.extend(quote! {
            #[automatically_derived]
            impl #impl_generics ::tether::message::Message for #ident #ty_generics #where_clause {
                #transaction_key
            }
        });
    }
}

impl Parse for DeriveMessage {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let input: DeriveInput = input.parse()?;
        let body = match &input.data {
            Data::Struct(data) => match key_field(&data.fields)? {
                Some((member, _)) => KeyLookup::Field(member),
                None => KeyLookup::None,
            },
            Data::Enum(data) => {
                let mut keyed = false;
                let arms = data
                    .variants
                    .iter()
                    .map(|variant| {
                        let name = &variant.ident;
                        let arm = match (key_field(&variant.fields)?, &variant.fields) {
                            (Some((Member::Named(field), _)), _) => {
                                keyed = true;
                                quote! {
                                    Self::#name { #field, .. } => {
                                        ::tether::message::TransactionKey::as_transaction_key(#field)
                                    }
                                }
                            }
                            (Some((Member::Unnamed(_), position)), Fields::Unnamed(fields)) => {
                                keyed = true;
                                let binding = format_ident!("__key");
                                let patterns = (0..fields.unnamed.len()).map(|i| {
                                    if i == position {
                                        quote! { #binding }
                                    } else {
                                        quote! { _ }
                                    }
                                });
                                quote! {
                                    Self::#name( #( #patterns ),* ) => {
                                        ::tether::message::TransactionKey::as_transaction_key(#binding)
                                    }
                                }
                            }
                            _ => quote! {
                                Self::#name { .. } => ::std::option::Option::None,
                            },
                        };
                        Ok(arm)
                    })
                    .collect::<syn::Result<Vec<_>>>()?;
                if keyed {
                    KeyLookup::Variants(arms)
                } else {
                    KeyLookup::None
                }
            }
            Data::Union(data) => {
                return Err(syn::Error::new(
                    data.union_token.span(),
                    "Message cannot be derived for unions",
                ))
            }
        };

        let mut generics = input.generics;
        let type_params: Vec<_> = generics
            .params
            .iter()
            .filter_map(|param| match param {
                GenericParam::Type(ty) => Some(ty.ident.clone()),
                _ => None,
            })
            .collect();
        if !type_params.is_empty() {
            let where_clause = generics.make_where_clause();
            for ty in type_params {
                where_clause
                    .predicates
                    .push(parse_quote! { #ty: ::std::marker::Send + 'static });
            }
        }

        Ok(DeriveMessage {
            ident: input.ident,
            generics,
            body,
        })
    }
}

/// Finds the single field marked `#[transaction_key]`, returning how to access it and its position.
fn key_field(fields: &Fields) -> syn::Result<Option<(Member, usize)>> {
    let mut marked = fields
        .iter()
        .enumerate()
        .filter(|(_, field)| is_transaction_key(field));

    let Some((position, field)) = marked.next() else {
        return Ok(None);
    };
    if let Some((_, duplicate)) = marked.next() {
        return Err(syn::Error::new(
            duplicate.span(),
            "only one field can be marked #[transaction_key]",
        ));
    }

    let member = match &field.ident {
        Some(ident) => Member::Named(ident.clone()),
        None => Member::Unnamed(Index::from(position)),
    };
    Ok(Some((member, position)))
}

fn is_transaction_key(field: &Field) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident("transaction_key"))
}

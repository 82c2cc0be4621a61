use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, parse_macro_input};

extern crate proc_macro;

/// Turns a struct into a beacon data record.
///
/// Derives the serde traits plus `Debug`, `Clone` and `PartialEq`, and implements
/// `insight::Record` so the struct can be flattened into beacon fields.
#[proc_macro_attribute]
pub fn record(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let input_struct = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl #impl_generics ::insight::Record for #input_struct #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

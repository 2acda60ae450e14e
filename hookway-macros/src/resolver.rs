//! `#[derive(Resolver)]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field, Type, parse_macro_input};

fn is_event_type(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Event"),
        _ => false,
    }
}

fn is_marked(field: &Field) -> bool {
    field.attrs.iter().any(|attr| attr.path().is_ident("event"))
}

pub fn derive_resolver_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return syn::Error::new_spanned(name, "Resolver can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let candidates: Vec<(usize, &Field)> = {
        let marked: Vec<_> = fields.iter().enumerate().filter(|(_, f)| is_marked(f)).collect();
        if marked.is_empty() {
            fields
                .iter()
                .enumerate()
                .filter(|(_, f)| is_event_type(&f.ty))
                .collect()
        } else {
            marked
        }
    };

    let (index, field) = match candidates.as_slice() {
        [one] => *one,
        [] => {
            return syn::Error::new_spanned(
                name,
                "no continuation field: add an `Event<Self>` field or mark one with #[event]",
            )
            .to_compile_error()
            .into();
        }
        [_, second, ..] => {
            return syn::Error::new_spanned(
                &second.1.ty,
                "multiple continuation fields: mark exactly one with #[event]",
            )
            .to_compile_error()
            .into();
        }
    };

    let access = match &field.ident {
        Some(ident) => quote! { #ident },
        None => {
            let index = syn::Index::from(index);
            quote! { #index }
        }
    };

    let expanded = quote! {
        impl #impl_generics ::hookway::Resolver for #name #ty_generics #where_clause {
            fn continuation(&mut self) -> &mut ::hookway::Event<Self> {
                &mut self.#access
            }
        }
    };

    TokenStream::from(expanded)
}

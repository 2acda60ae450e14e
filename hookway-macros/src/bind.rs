//! `#[derive(Bind)]`.
//!
//! Every field becomes one binding step. Scalar and slice fields go through
//! `FormField::bind_field`; `flatten` and `nested` fields recurse through
//! `Bindable::bind_fields` with the resolved prefix.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Expr, ExprLit, Field, Fields, Ident, Lit, LitStr, Meta, Token,
    parse_macro_input, punctuated::Punctuated,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    Scalar,
    Flatten,
    Nested,
}

struct FieldArgs {
    tags: Vec<(String, LitStr)>,
    shape: Shape,
}

impl FieldArgs {
    fn from_field(field: &Field) -> syn::Result<Self> {
        let mut tags = Vec::new();
        let mut shape = Shape::Scalar;

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("bind")) {
            let metas = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
            for meta in metas {
                match meta {
                    Meta::Path(path) if path.is_ident("flatten") => shape = Shape::Flatten,
                    Meta::Path(path) if path.is_ident("nested") => shape = Shape::Nested,
                    Meta::NameValue(nv) => {
                        let key = nv
                            .path
                            .get_ident()
                            .map(Ident::to_string)
                            .ok_or_else(|| {
                                syn::Error::new_spanned(&nv.path, "expected a tag key")
                            })?;
                        match nv.value {
                            Expr::Lit(ExprLit {
                                lit: Lit::Str(name),
                                ..
                            }) => tags.push((key, name)),
                            other => {
                                return Err(syn::Error::new_spanned(
                                    other,
                                    "tag values must be string literals",
                                ));
                            }
                        }
                    }
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "expected `flatten`, `nested` or `key = \"name\"`",
                        ));
                    }
                }
            }
        }

        Ok(Self { tags, shape })
    }
}

fn bind_step(field: &Field) -> syn::Result<TokenStream2> {
    let args = FieldArgs::from_field(field)?;
    let Some(ident) = &field.ident else {
        return Err(syn::Error::new_spanned(field, "Bind requires named fields"));
    };

    let raw = ident.to_string();
    let ident_name = raw.strip_prefix("r#").unwrap_or(&raw);
    let tag_keys = args.tags.iter().map(|(key, _)| key.as_str());
    let tag_names = args.tags.iter().map(|(_, name)| name);
    let flatten = args.shape == Shape::Flatten;

    let resolve = quote! {
        ::hookway::binder::field_name(
            &[#((#tag_keys, #tag_names)),*],
            tag_key,
            #ident_name,
            prefix,
            #flatten,
        )
    };

    let step = match args.shape {
        Shape::Scalar => quote! {
            if let ::core::option::Option::Some(name) = #resolve {
                ::hookway::binder::FormField::bind_field(&mut self.#ident, data, &name)
                    .map_err(|err| ::hookway::binder::field_error(&name, err))?;
            }
        },
        Shape::Flatten | Shape::Nested => quote! {
            if let ::core::option::Option::Some(name) = #resolve {
                ::hookway::binder::Bindable::bind_fields(&mut self.#ident, data, tag_key, &name)?;
            }
        },
    };
    Ok(step)
}

pub fn derive_bind_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(name, "Bind requires a struct with named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "Bind can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let steps = match fields.iter().map(bind_step).collect::<syn::Result<Vec<_>>>() {
        Ok(steps) => steps,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        impl #impl_generics ::hookway::binder::Bindable for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn bind_fields(
                &mut self,
                data: &::hookway::binder::FormData,
                tag_key: &str,
                prefix: &str,
            ) -> ::core::result::Result<(), ::hookway::binder::BindError> {
                #(#steps)*
                ::core::result::Result::Ok(())
            }

            fn merge_json_payload(
                &mut self,
                payload: &[u8],
            ) -> ::core::result::Result<(), ::hookway::binder::BindError> {
                ::hookway::binder::merge_json_into(self, payload)
            }
        }
    };

    TokenStream::from(expanded)
}
